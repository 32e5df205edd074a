//! The normalized application error envelope.
//!
//! Every failure boundary in PipeCRM (form validation, the remote identity
//! provider, the data API, configuration) produces one [`AppError`]. The
//! envelope is a tagged enum with one variant per [`AppErrorCode`], so
//! handling sites match exhaustively instead of guessing at shapes.
//!
//! Serialized form:
//!
//! ```json
//! { "code": "AUTH_ERROR", "origin": "REMOTE", "message": "...", "details": {}, "userFriendly": true }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Fallback message when nothing better is known about a failure.
const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred.";

/// Fallback message when a validation failure carries no issues.
const INVALID_DATA_MESSAGE: &str = "Invalid data.";

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "SERVER_ERROR")]
    Server,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "CONFIG_ERROR")]
    Config,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl AppErrorCode {
    /// Wire value of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Config => "CONFIG_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for AppErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The layer at which a failure was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorOrigin {
    /// Client-side input validation.
    Schema,
    /// The hosted backend (identity provider or data API).
    Remote,
    /// The HTTP transport.
    Http,
    /// A domain service.
    Service,
    /// The auth store.
    Store,
    /// The presentation layer.
    Ui,
    /// Process configuration.
    Environment,
    /// Not classified.
    Unknown,
}

impl ErrorOrigin {
    /// Wire value of this origin.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "SCHEMA",
            Self::Remote => "REMOTE",
            Self::Http => "HTTP",
            Self::Service => "SERVICE",
            Self::Store => "STORE",
            Self::Ui => "UI",
            Self::Environment => "ENVIRONMENT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shared by every [`AppError`] variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    /// Where the failure was observed.
    pub origin: ErrorOrigin,
    /// User-facing message.
    pub message: String,
    /// Structured context for diagnostics.
    pub details: Option<Map<String, Value>>,
    /// Whether `message` is safe and meaningful to show to the user.
    pub user_friendly: Option<bool>,
}

impl ErrorBody {
    fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            details: None,
            user_friendly: None,
        }
    }
}

/// Normalized application error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    /// Client-side validation failed.
    #[error("{}", .0.message)]
    Validation(ErrorBody),
    /// Bad credentials or an unusable session.
    #[error("{}", .0.message)]
    Auth(ErrorBody),
    /// The backend could not be reached.
    #[error("{}", .0.message)]
    Network(ErrorBody),
    /// The backend failed unexpectedly.
    #[error("{}", .0.message)]
    Server(ErrorBody),
    /// The requested record does not exist.
    #[error("{}", .0.message)]
    NotFound(ErrorBody),
    /// Row-level security denied access.
    #[error("{}", .0.message)]
    Forbidden(ErrorBody),
    /// Configuration is missing or invalid. Fatal at startup.
    #[error("{}", .0.message)]
    Config(ErrorBody),
    /// Anything that was not normalized elsewhere.
    #[error("{}", .0.message)]
    Unknown(ErrorBody),
}

impl AppError {
    /// Build a fully formed error for `code`.
    #[must_use]
    pub fn new(code: AppErrorCode, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        let body = ErrorBody::new(origin, message);
        match code {
            AppErrorCode::Validation => Self::Validation(body),
            AppErrorCode::Auth => Self::Auth(body),
            AppErrorCode::Network => Self::Network(body),
            AppErrorCode::Server => Self::Server(body),
            AppErrorCode::NotFound => Self::NotFound(body),
            AppErrorCode::Forbidden => Self::Forbidden(body),
            AppErrorCode::Config => Self::Config(body),
            AppErrorCode::Unknown => Self::Unknown(body),
        }
    }

    /// Shorthand for an `AUTH_ERROR`.
    #[must_use]
    pub fn auth(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Auth, origin, message)
    }

    /// Shorthand for a `SERVER_ERROR`.
    #[must_use]
    pub fn server(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Server, origin, message)
    }

    /// Shorthand for a `CONFIG_ERROR` raised from the environment.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Config, ErrorOrigin::Environment, message).user_friendly()
    }

    /// Mark the message as safe to show to the user.
    #[must_use]
    pub fn user_friendly(mut self) -> Self {
        self.body_mut().user_friendly = Some(true);
        self
    }

    /// Attach one detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body_mut()
            .details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the details with the entries of a JSON object.
    ///
    /// Non-object values are stored under a `value` key.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        let map = match details {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        self.body_mut().details = Some(map);
        self
    }

    /// The machine-readable code.
    #[must_use]
    pub const fn code(&self) -> AppErrorCode {
        match self {
            Self::Validation(_) => AppErrorCode::Validation,
            Self::Auth(_) => AppErrorCode::Auth,
            Self::Network(_) => AppErrorCode::Network,
            Self::Server(_) => AppErrorCode::Server,
            Self::NotFound(_) => AppErrorCode::NotFound,
            Self::Forbidden(_) => AppErrorCode::Forbidden,
            Self::Config(_) => AppErrorCode::Config,
            Self::Unknown(_) => AppErrorCode::Unknown,
        }
    }

    /// The shared payload.
    #[must_use]
    pub const fn body(&self) -> &ErrorBody {
        match self {
            Self::Validation(body)
            | Self::Auth(body)
            | Self::Network(body)
            | Self::Server(body)
            | Self::NotFound(body)
            | Self::Forbidden(body)
            | Self::Config(body)
            | Self::Unknown(body) => body,
        }
    }

    const fn body_mut(&mut self) -> &mut ErrorBody {
        match self {
            Self::Validation(body)
            | Self::Auth(body)
            | Self::Network(body)
            | Self::Server(body)
            | Self::NotFound(body)
            | Self::Forbidden(body)
            | Self::Config(body)
            | Self::Unknown(body) => body,
        }
    }

    /// Where the failure was observed.
    #[must_use]
    pub const fn origin(&self) -> ErrorOrigin {
        self.body().origin
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.body().message
    }

    /// Structured diagnostic context, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&Map<String, Value>> {
        self.body().details.as_ref()
    }

    /// Whether the message was marked safe to show.
    #[must_use]
    pub fn is_user_friendly(&self) -> bool {
        self.body().user_friendly == Some(true)
    }

    /// Expected, user-caused validation failure. These are never reported.
    #[must_use]
    pub fn is_expected_validation(&self) -> bool {
        matches!(self, Self::Validation(_)) && self.is_user_friendly()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppErrorRecord<'a> {
    code: AppErrorCode,
    origin: ErrorOrigin,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_friendly: Option<bool>,
}

impl Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = self.body();
        AppErrorRecord {
            code: self.code(),
            origin: body.origin,
            message: &body.message,
            details: body.details.as_ref(),
            user_friendly: body.user_friendly,
        }
        .serialize(serializer)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// One failed input rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: String,
    /// User-facing explanation.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation issue.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every issue found while validating one payload, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{} validation issue(s)", .0.len())]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    /// Start an empty issue list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record an issue.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError::new(field, message));
    }

    /// Whether no issue was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The recorded issues.
    #[must_use]
    pub fn issues(&self) -> &[ValidationError] {
        &self.0
    }

    /// `Ok(value)` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the collected issues when at least one was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

/// Map client-side validation issues to a `VALIDATION_ERROR`.
///
/// The first issue becomes the message; all issues are kept in the details.
#[must_use]
pub fn map_validation_errors(errors: &ValidationErrors) -> AppError {
    let message = errors
        .issues()
        .first()
        .map_or(INVALID_DATA_MESSAGE, |issue| issue.message.as_str());

    AppError::new(AppErrorCode::Validation, ErrorOrigin::Schema, message)
        .with_detail("issues", json!(errors.issues()))
        .user_friendly()
}

// =============================================================================
// Unknown failures
// =============================================================================

/// A failure that was not normalized at its source.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownFailure {
    /// A bare message.
    Message(String),
    /// A Rust error, flattened.
    Error {
        /// Type name of the error.
        name: String,
        /// `Display` output of the error.
        message: String,
        /// `Display` output of each `source()` in order.
        sources: Vec<String>,
    },
    /// Some other value.
    Opaque(Value),
}

impl UnknownFailure {
    /// Flatten a Rust error and its source chain.
    #[must_use]
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut sources = Vec::new();
        let mut next = error.source();
        while let Some(source) = next {
            sources.push(source.to_string());
            next = source.source();
        }

        Self::Error {
            name: std::any::type_name::<E>().to_owned(),
            message: error.to_string(),
            sources,
        }
    }
}

impl From<&str> for UnknownFailure {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

impl From<String> for UnknownFailure {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<Value> for UnknownFailure {
    fn from(value: Value) -> Self {
        Self::Opaque(value)
    }
}

/// Wrap a non-normalized failure as `UNKNOWN`, keeping what is known about it.
#[must_use]
pub fn map_unknown_error(failure: impl Into<UnknownFailure>) -> AppError {
    match failure.into() {
        UnknownFailure::Message(message) => {
            AppError::new(AppErrorCode::Unknown, ErrorOrigin::Unknown, message.clone())
                .with_detail("raw", message)
        }
        UnknownFailure::Error {
            name,
            message,
            sources,
        } => AppError::new(AppErrorCode::Unknown, ErrorOrigin::Unknown, message)
            .with_detail("name", name)
            .with_detail("sources", sources),
        UnknownFailure::Opaque(value) => {
            AppError::new(AppErrorCode::Unknown, ErrorOrigin::Unknown, UNEXPECTED_MESSAGE)
                .with_detail("raw", value)
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Any failure a service can observe before it is normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Input rejected by client-side validation.
    Validation(ValidationErrors),
    /// Already normalized.
    App(AppError),
    /// Anything else.
    Unknown(UnknownFailure),
}

impl Failure {
    /// Normalize into the single application error shape.
    #[must_use]
    pub fn into_app_error(self) -> AppError {
        match self {
            Self::Validation(errors) => map_validation_errors(&errors),
            Self::App(error) => error,
            Self::Unknown(failure) => map_unknown_error(failure),
        }
    }
}

impl From<ValidationErrors> for Failure {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<AppError> for Failure {
    fn from(error: AppError) -> Self {
        Self::App(error)
    }
}

impl From<UnknownFailure> for Failure {
    fn from(failure: UnknownFailure) -> Self {
        Self::Unknown(failure)
    }
}
