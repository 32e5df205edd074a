//! PipeCRM Core - Shared types library.
//!
//! This crate provides common types used across all PipeCRM components:
//! - `client` - Remote client, auth lifecycle, resource services and dashboard
//! - `cli` - Command-line front-end
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no HTTP clients.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, emails, and statuses
//! - [`error`] - The normalized [`AppError`] envelope and its mappers

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod error;
pub mod types;

pub use error::{
    AppError, AppErrorCode, ErrorBody, ErrorOrigin, Failure, UnknownFailure, ValidationError,
    ValidationErrors, map_unknown_error, map_validation_errors,
};
pub use types::*;
