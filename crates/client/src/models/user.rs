//! The signed-in user as the application sees it.

use pipecrm_core::UserId;
use serde::{Deserialize, Serialize};

use crate::supabase::RemoteUser;

/// The authenticated user held by the auth store.
///
/// `is_admin` is never derived from the identity provider's claims: every
/// constructor sets it to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
    pub is_admin: bool,
}

impl AuthUser {
    /// Build from a remote identity, using `fallback_email` when the
    /// identity has none.
    #[must_use]
    pub fn from_remote(user: &RemoteUser, fallback_email: &str) -> Self {
        Self {
            id: user.id,
            email: user
                .email
                .clone()
                .unwrap_or_else(|| fallback_email.to_string()),
            is_admin: false,
        }
    }
}
