//! CLI command implementations.
//!
//! Every command first navigates the router to the app path it stands for,
//! so the route guard decides whether it may run, exactly as it does for
//! the app's screens.

pub mod auth;
pub mod data;

use pipecrm_client::router::ResolvedRoute;
use pipecrm_client::supabase::{AuthApi, DataApi};
use pipecrm_client::{AppContext, RouterError};
use pipecrm_core::AppError;
use thiserror::Error;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// A client operation failed.
    #[error("{}: {}", .0.code(), .0.message())]
    App(#[from] AppError),

    /// The target path did not resolve.
    #[error("Navigation error: {0}")]
    Router(#[from] RouterError),

    /// The route guard sent the command somewhere else.
    #[error("Redirected to {0}")]
    Redirected(String),

    /// Writing output or reading input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Navigate to `path` and fail if the guard redirects.
pub async fn enter<B>(ctx: &AppContext<B>, path: &str) -> Result<ResolvedRoute, CliError>
where
    B: AuthApi + DataApi + Clone,
{
    let navigation = ctx.router().navigate(path).await?;
    if navigation.was_redirected() {
        return Err(CliError::Redirected(navigation.route.full_path));
    }
    Ok(navigation.route)
}

/// The error an auth store action left behind, if any.
pub fn store_outcome<B>(ctx: &AppContext<B>) -> Result<(), CliError>
where
    B: AuthApi + DataApi + Clone,
{
    ctx.store().error().map_or(Ok(()), |e| Err(CliError::App(e)))
}
