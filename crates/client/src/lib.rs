//! PipeCRM client library.
//!
//! Session lifecycle, navigation guard and CRM services over a Supabase
//! backend. Front-ends build one [`AppContext`] at startup and drive
//! everything through it.
//!
//! # Modules
//!
//! - [`config`] - Environment configuration
//! - [`supabase`] - Remote client (`AuthApi`, `DataApi`) and session storage
//! - [`tracking`] - Error reporting
//! - [`services`] - Auth service, resource services, dashboard aggregation
//! - [`store`] - Auth state store
//! - [`router`] - Route table and navigation guard
//! - [`view_state`], [`board`] - Loading / error / data wrappers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod board;
pub mod config;
pub mod context;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod supabase;
pub mod tracking;
pub mod view_state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use board::PipelineBoard;
pub use config::{ClientConfig, ConfigError, SentryConfig};
pub use context::AppContext;
pub use router::{Navigation, RouteGuardDecision, Router, RouterError};
pub use store::{AuthStore, AuthStoreState};
pub use tracking::ErrorTracker;
pub use view_state::ResourceState;
