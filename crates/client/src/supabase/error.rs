use serde::Deserialize;
use thiserror::Error;

use super::storage::StorageError;

/// Errors returned by the Supabase backend or the transport to it.
///
/// Clonable so that recorded failures can be replayed; transport errors are
/// flattened to their message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The auth server (GoTrue) rejected the request.
    #[error("{message}")]
    Auth {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The data API (PostgREST) rejected the request.
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    /// A success response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Persisting or loading the session failed.
    #[error("session storage: {0}")]
    Storage(String),
}

impl RemoteError {
    /// Backend error code (`PGRST301`, `invalid_credentials`, ...), if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Auth { code, .. } | Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of a rejected request.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request failed before reaching the backend.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// A data API error with the given code, as PostgREST reports it.
    #[must_use]
    pub fn api(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: Some(code.to_string()),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    /// An auth server rejection.
    #[must_use]
    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self::Auth {
            status,
            code: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<StorageError> for RemoteError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error.to_string())
    }
}

/// GoTrue error body. Older servers use `error`/`error_description`,
/// newer ones `code`/`msg`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AuthErrorBody {
    pub(crate) fn into_error(self, status: u16) -> RemoteError {
        let message = self
            .msg
            .or(self.message)
            .or(self.error_description)
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("auth request failed with status {status}"));

        RemoteError::Auth {
            status,
            code: self.error_code.or(self.error),
            message,
        }
    }
}

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl ApiErrorBody {
    pub(crate) fn into_error(self, status: u16) -> RemoteError {
        RemoteError::Api {
            status,
            code: self.code,
            message: self
                .message
                .unwrap_or_else(|| format!("request failed with status {status}")),
            details: self.details,
            hint: self.hint,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_body_prefers_msg() {
        let body: AuthErrorBody = serde_json::from_str(
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        )
        .unwrap();
        let error = body.into_error(400);
        assert_eq!(error.to_string(), "Invalid login credentials");
        assert_eq!(error.code(), Some("invalid_credentials"));
    }

    #[test]
    fn test_auth_body_legacy_shape() {
        let body: AuthErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        )
        .unwrap();
        let error = body.into_error(400);
        assert_eq!(error.to_string(), "Invalid login credentials");
        assert_eq!(error.code(), Some("invalid_grant"));
    }

    #[test]
    fn test_api_body() {
        let body: ApiErrorBody = serde_json::from_str(
            r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned","details":"The result contains 0 rows","hint":null}"#,
        )
        .unwrap();
        let error = body.into_error(406);
        assert_eq!(error.code(), Some("PGRST116"));
        assert_eq!(error.status(), Some(406));
    }

    #[test]
    fn test_empty_body_has_fallback_message() {
        let error = ApiErrorBody::default().into_error(500);
        assert_eq!(error.to_string(), "request failed with status 500");
    }
}
