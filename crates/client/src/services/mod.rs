//! Application services.
//!
//! # Services
//!
//! - `auth` - Sign-in, registration, MFA and session lifecycle
//! - `deals`, `contacts`, `companies`, `activities` - CRUD over the data API
//! - `pipelines` - The user's default pipeline and its stages
//! - `dashboard` - Client-side metrics aggregation
//!
//! The resource services are thin pass-throughs: they build the query and
//! return the backend error unchanged. Mapping to
//! [`AppError`](pipecrm_core::AppError) happens in the view state.

pub mod activities;
pub mod auth;
pub mod companies;
pub mod contacts;
pub mod dashboard;
pub mod deals;
pub mod error;
pub mod pipelines;

pub use activities::ActivitiesService;
pub use auth::AuthService;
pub use companies::CompaniesService;
pub use contacts::ContactsService;
pub use dashboard::DashboardService;
pub use deals::DealsService;
pub use error::map_data_error;
pub use pipelines::PipelinesService;
