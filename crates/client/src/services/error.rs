//! Mapping of backend failures to [`AppError`].

use pipecrm_core::{AppError, AppErrorCode, ErrorOrigin};
use serde_json::{Value, json};

use crate::supabase::RemoteError;

/// Row-level security denied the request.
const PGRST_FORBIDDEN: &str = "PGRST301";
/// A single row was requested and zero (or several) matched.
const PGRST_NO_ROWS: &str = "PGRST116";

/// Map a data API failure.
///
/// `PGRST301` becomes `FORBIDDEN`, `PGRST116` becomes `NOT_FOUND`, transport
/// failures become `NETWORK_ERROR`; everything else is a `SERVER_ERROR`.
#[must_use]
pub fn map_data_error(error: &RemoteError) -> AppError {
    let mapped = match error.code() {
        Some(PGRST_FORBIDDEN) => AppError::new(
            AppErrorCode::Forbidden,
            ErrorOrigin::Remote,
            "You do not have permission to access this resource.",
        ),
        Some(PGRST_NO_ROWS) => AppError::new(
            AppErrorCode::NotFound,
            ErrorOrigin::Remote,
            "The requested record was not found.",
        ),
        _ if error.is_transport() => network_error(),
        _ => AppError::server(ErrorOrigin::Remote, "Error communicating with the server."),
    };

    mapped.with_detail("remote", remote_details(error)).user_friendly()
}

pub(crate) fn network_error() -> AppError {
    AppError::new(
        AppErrorCode::Network,
        ErrorOrigin::Http,
        "Could not reach the server. Check your connection.",
    )
}

/// Diagnostic snapshot of a backend error.
pub(crate) fn remote_details(error: &RemoteError) -> Value {
    json!({
        "status": error.status(),
        "code": error.code(),
        "message": error.to_string(),
    })
}
