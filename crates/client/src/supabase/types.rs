//! Wire types of the Supabase auth API (GoTrue).

use pipecrm_core::UserId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Seconds before expiry at which an access token is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// An identity as reported by the auth server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub app_metadata: Map<String, Value>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

/// An authenticated session.
///
/// Implements `Debug` manually to redact the tokens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix timestamp (seconds) at which the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: RemoteUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.id)
            .finish()
    }
}

impl Session {
    /// Fill `expires_at` from `expires_in` when the server omitted it.
    #[must_use]
    pub fn anchored(mut self, now: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now + secs);
        }
        self
    }

    /// Whether the access token is expired (or about to be) at `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - EXPIRY_MARGIN_SECS <= now)
    }
}

/// Result of a sign-in, sign-up or OTP verification.
///
/// Sign-up with email confirmation enabled returns a user and no session.
#[derive(Debug, Clone, Default)]
pub struct AuthResponse {
    pub session: Option<Session>,
    pub user: Option<RemoteUser>,
}

impl AuthResponse {
    /// The identity, preferring the session's copy.
    #[must_use]
    pub fn identity(&self) -> Option<&RemoteUser> {
        self.session
            .as_ref()
            .map(|session| &session.user)
            .or(self.user.as_ref())
    }
}

/// One-time password flavours accepted by `/verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Email,
    Signup,
    Recovery,
    Magiclink,
}

/// OAuth identity providers enabled for the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}
