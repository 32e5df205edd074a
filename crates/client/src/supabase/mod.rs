//! Supabase backend client.
//!
//! Two seams describe everything PipeCRM asks of the hosted backend:
//!
//! - [`AuthApi`]: the identity provider (GoTrue, `/auth/v1`)
//! - [`DataApi`]: the row-level-secured data API (PostgREST, `/rest/v1`)
//!
//! [`SupabaseClient`] implements both over HTTP. Every call returns
//! `Result<_, RemoteError>`; mapping to [`pipecrm_core::AppError`] happens in
//! the services.
//!
//! # API Reference
//!
//! - Base URL: `PIPECRM_SUPABASE_URL`
//! - Authentication: `apikey: <anon key>` on every request, plus
//!   `Authorization: Bearer <access token>` once signed in

mod auth;
mod error;
mod query;
mod rest;
mod storage;
mod types;

pub use error::RemoteError;
pub use query::{Order, Query};
pub use storage::{FileStorage, IS_AUTHENTICATED_KEY, MemoryStorage, SessionStorage, StorageError};
pub use types::{AuthResponse, OAuthProvider, OtpType, RemoteUser, Session};

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;

/// The identity provider.
pub trait AuthApi: Send + Sync {
    /// Exchange email and password for a session.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthResponse, RemoteError>> + Send;

    /// Register a new account. The confirmation email links to `redirect_to`.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> impl Future<Output = Result<AuthResponse, RemoteError>> + Send;

    /// URL that starts an OAuth sign-in with `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built.
    fn authorize_url(&self, provider: OAuthProvider, redirect_to: &str)
    -> Result<Url, RemoteError>;

    /// Establish the session carried by an auth redirect (OAuth, magic link,
    /// recovery link). `None` when the URL carries no tokens.
    fn session_from_redirect(
        &self,
        callback: &Url,
    ) -> impl Future<Output = Result<Option<Session>, RemoteError>> + Send;

    /// The identity of the current session, `None` when signed out.
    fn get_user(&self) -> impl Future<Output = Result<Option<RemoteUser>, RemoteError>> + Send;

    /// Email a one-time code to an existing user.
    fn send_email_otp(&self, email: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Verify a one-time code.
    fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpType,
    ) -> impl Future<Output = Result<AuthResponse, RemoteError>> + Send;

    /// Email a password recovery link pointing at `redirect_to`.
    fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Change the password of the current user.
    fn update_password(
        &self,
        password: &str,
    ) -> impl Future<Output = Result<RemoteUser, RemoteError>> + Send;

    /// Revoke the current session and forget it locally.
    fn sign_out(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Load the persisted session, refreshing it when expired.
    fn restore_session(&self)
    -> impl Future<Output = Result<Option<Session>, RemoteError>> + Send;
}

/// The data API. Row-level security scopes every call to the current user.
pub trait DataApi: Send + Sync {
    /// Rows matching `query`.
    fn select<T: DeserializeOwned + Send>(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<T>, RemoteError>> + Send;

    /// Exactly one row matching `query`; `PGRST116` otherwise.
    fn select_single<T: DeserializeOwned + Send>(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<T, RemoteError>> + Send;

    /// Insert one row and return it as stored.
    fn insert<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        table: &str,
        row: &B,
    ) -> impl Future<Output = Result<T, RemoteError>> + Send;

    /// Insert several rows at once.
    fn insert_many<B: Serialize + Sync>(
        &self,
        table: &str,
        rows: &[B],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Apply `patch` to the single row matching `query` and return it.
    fn update<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        query: &Query,
        patch: &B,
    ) -> impl Future<Output = Result<T, RemoteError>> + Send;

    /// Delete the rows matching `query`.
    fn delete(&self, query: &Query) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Insert `row`, merging into the existing row on an `on_conflict` clash.
    fn upsert<B: Serialize + Sync>(
        &self,
        table: &str,
        row: &B,
        on_conflict: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Supabase HTTP client.
///
/// Cheap to clone; clones share the HTTP connection pool and the session.
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<SupabaseClientInner>,
}

struct SupabaseClientInner {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    storage: Arc<dyn SessionStorage>,
    session: Mutex<Option<Session>>,
}

impl SupabaseClient {
    /// Create a new client. The session is loaded lazily from `storage`.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(
        config: &ClientConfig,
        storage: Arc<dyn SessionStorage>,
    ) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(config.supabase_key.expose_secret())
                .map_err(|e| RemoteError::Transport(format!("Invalid API key format: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(SupabaseClientInner {
                http,
                base_url: config.supabase_url.as_str().trim_end_matches('/').to_string(),
                api_key: config.supabase_key.clone(),
                storage,
                session: Mutex::new(None),
            }),
        })
    }

    /// The session currently held in memory.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The storage backing this client.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        Arc::clone(&self.inner.storage)
    }

    fn endpoint(&self, service: &str, path: &str) -> Result<Url, RemoteError> {
        let raw = format!("{}/{service}/v1{path}", self.inner.base_url);
        Url::parse(&raw).map_err(|e| RemoteError::Transport(format!("invalid URL {raw}: {e}")))
    }

    /// Hold `session` in memory and persist it.
    fn store_session(&self, session: Session) -> Result<(), RemoteError> {
        self.inner.storage.save_session(&session)?;
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    /// Forget the session in memory and in storage.
    fn drop_session(&self) -> Result<(), RemoteError> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.storage.clear_session()?;
        Ok(())
    }

    /// Bearer token for data requests: the user's when signed in, else the
    /// anonymous key.
    async fn bearer(&self) -> Result<String, RemoteError> {
        Ok(match self.fresh_session().await? {
            Some(session) => session.access_token,
            None => self.inner.api_key.expose_secret().to_string(),
        })
    }
}

/// Current Unix time in seconds.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
