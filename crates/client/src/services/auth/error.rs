//! Mapping of identity provider failures to [`AppError`].

use pipecrm_core::{AppError, ErrorOrigin};

use crate::services::error::{network_error, remote_details};
use crate::supabase::RemoteError;

const INVALID_CREDENTIALS: &str = "invalid login credentials";

/// Map an identity provider failure.
///
/// A rejection whose message mentions invalid login credentials (any case)
/// is an `AUTH_ERROR`; every other rejection is a `SERVER_ERROR`. Transport
/// failures, which never reached the provider, are `NETWORK_ERROR`.
#[must_use]
pub fn map_auth_error(error: &RemoteError) -> AppError {
    let mapped = if error.is_transport() {
        network_error()
    } else if error.to_string().to_lowercase().contains(INVALID_CREDENTIALS) {
        AppError::auth(ErrorOrigin::Remote, "Invalid email or password.")
    } else {
        AppError::server(
            ErrorOrigin::Remote,
            "Authentication failed. Please try again later.",
        )
    };

    mapped.with_detail("remote", remote_details(error)).user_friendly()
}
