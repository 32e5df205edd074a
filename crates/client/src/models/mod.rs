//! Domain models mirroring the hosted tables.

mod activity;
mod company;
mod contact;
mod dashboard;
mod deal;
mod pipeline;
mod user;

pub use activity::*;
pub use company::*;
pub use contact::*;
pub use dashboard::*;
pub use deal::*;
pub use pipeline::*;
pub use user::*;
