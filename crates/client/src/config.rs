//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PIPECRM_SUPABASE_URL` - Base URL of the Supabase project
//! - `PIPECRM_SUPABASE_KEY` - Anonymous (publishable) API key of the project
//!
//! ## Optional
//! - `PIPECRM_SITE_URL` - Public origin used for auth redirects (default: `http://localhost:5173`)
//! - `PIPECRM_SESSION_FILE` - Where to persist the auth session (default: in memory only)
//! - `PIPECRM_REQUIRE_EMAIL_OTP` - Require an emailed one-time code after password sign-in
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Traces sample rate (default: 1.0)

use std::collections::HashMap;
use std::path::PathBuf;

use pipecrm_core::AppError;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_SITE_URL: &str = "http://localhost:5173";
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "placeholder",
    "replace-me",
    "example",
    "insert-",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

impl ConfigError {
    /// Name of the offending variable.
    #[must_use]
    pub fn variable(&self) -> &str {
        match self {
            Self::MissingEnvVar(name)
            | Self::InvalidEnvVar(name, _)
            | Self::InsecureSecret(name, _) => name,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        let variable = error.variable().to_owned();
        Self::config(error.to_string()).with_detail("variable", variable)
    }
}

/// Sentry settings. Reporting is disabled when `dsn` is `None`.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub environment: Option<String>,
    pub sample_rate: f32,
    pub traces_sample_rate: f32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 1.0,
        }
    }
}

/// PipeCRM client configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct ClientConfig {
    /// Supabase project URL
    pub supabase_url: Url,
    /// Supabase anonymous API key
    pub supabase_key: SecretString,
    /// Public origin of the app, used to build auth redirect URLs
    pub site_url: Url,
    /// File the auth session is persisted to, if any
    pub session_file: Option<PathBuf>,
    /// Whether password sign-in must be followed by an email OTP
    pub require_email_otp: bool,
    /// Error tracking
    pub sentry: SentryConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("supabase_url", &self.supabase_url.as_str())
            .field("supabase_key", &"[REDACTED]")
            .field("site_url", &self.site_url.as_str())
            .field("session_file", &self.session_file)
            .field("require_email_otp", &self.require_email_otp)
            .field("sentry", &self.sentry)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let supabase_url = env.url("PIPECRM_SUPABASE_URL", None)?;
        let supabase_key = env.validated_secret("PIPECRM_SUPABASE_KEY")?;
        let site_url = env.url("PIPECRM_SITE_URL", Some(DEFAULT_SITE_URL))?;
        let session_file = env.optional("PIPECRM_SESSION_FILE").map(PathBuf::from);
        let require_email_otp = env.flag("PIPECRM_REQUIRE_EMAIL_OTP")?;

        let sentry = SentryConfig {
            dsn: env.optional("SENTRY_DSN"),
            environment: env.optional("SENTRY_ENVIRONMENT"),
            sample_rate: env
                .optional("SENTRY_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            traces_sample_rate: env
                .optional("SENTRY_TRACES_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
        };

        Ok(Self {
            supabase_url,
            supabase_key,
            site_url,
            session_file,
            require_email_otp,
            sentry,
        })
    }

    /// Absolute URL of an app path, e.g. `/auth/callback`.
    #[must_use]
    pub fn site_path(&self, path: &str) -> String {
        format!("{}{path}", self.site_url.as_str().trim_end_matches('/'))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// Get an optional variable; blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn url(&self, key: &str, default: Option<&str>) -> Result<Url, ConfigError> {
        let raw = match default {
            Some(default) => self.optional(key).unwrap_or_else(|| default.to_string()),
            None => self.required(key)?,
        };

        let url = Url::parse(&raw)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        Ok(url)
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("expected a boolean, got '{other}'"),
            )),
        }
    }

    /// Load and validate a secret.
    fn validated_secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        let value = self.required(key)?;
        validate_secret_strength(&value, key)?;
        Ok(SecretString::from(value))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}
