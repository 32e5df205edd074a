//! Authentication service.
//!
//! The single boundary between PipeCRM and the identity provider. Every
//! method validates its input before any remote call, and every failure
//! leaves as one [`AppError`] after being reported to the tracker with a
//! method-qualified context.

mod error;
pub mod schemas;

pub use error::map_auth_error;

use pipecrm_core::{AppError, ErrorOrigin, Failure};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::models::AuthUser;
use crate::services::error::remote_details;
use crate::supabase::{AuthApi, OAuthProvider, OtpType, RemoteError};
use crate::tracking::ErrorTracker;

use schemas::expose;

/// App path the identity provider redirects to after OAuth and email links.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// App path password recovery links point at.
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// Where to send the user to continue an OAuth sign-in.
///
/// Control leaves the app here; the outcome arrives later through
/// [`AuthService::handle_auth_callback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthRedirect {
    pub url: Url,
}

impl std::fmt::Display for OAuthRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Outcome of an auth redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCallback {
    /// The current identity, `None` when signed out.
    pub user: Option<AuthUser>,
    /// Whether the redirect itself carried a session that is now active.
    pub established: bool,
}

/// Settings the service needs from the client configuration.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Public origin of the app, without trailing slash.
    pub site_url: String,
    /// Follow password sign-in with an emailed one-time code.
    pub require_email_otp: bool,
}

impl AuthSettings {
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            site_url: config.site_path(""),
            require_email_otp: config.require_email_otp,
        }
    }

    fn redirect(&self, path: &str) -> String {
        format!("{}{path}", self.site_url)
    }
}

/// Authentication service.
#[derive(Debug, Clone)]
pub struct AuthService<A> {
    api: A,
    tracker: ErrorTracker,
    settings: AuthSettings,
}

impl<A: AuthApi> AuthService<A> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(api: A, tracker: ErrorTracker, settings: AuthSettings) -> Self {
        Self {
            api,
            tracker,
            settings,
        }
    }

    /// The remote API this service talks to.
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Whether password sign-in must be completed with an emailed code.
    #[must_use]
    pub const fn requires_mfa(&self) -> bool {
        self.settings.require_email_otp
    }

    // =========================================================================
    // Sign-in
    // =========================================================================

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// - `VALIDATION_ERROR` for a malformed email or short password (no
    ///   remote call is made)
    /// - `AUTH_ERROR` when the provider rejects the credentials
    /// - `SERVER_ERROR` for any other rejection, or a success without identity
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AppError> {
        let attempt = async {
            let payload = schemas::sign_in(email, password)?;

            let response = self
                .api
                .sign_in_with_password(payload.email.as_str(), expose(&payload.password))
                .await
                .map_err(rejected)?;

            let identity = response.identity().ok_or_else(|| {
                AppError::server(ErrorOrigin::Service, "Invalid session after sign-in.")
                    .user_friendly()
            })?;

            Ok::<_, Failure>(AuthUser::from_remote(identity, payload.email.as_str()))
        };

        let user = self.settle(attempt.await, "auth.signIn")?;
        info!(user_id = %user.id, "User signed in");
        Ok(user)
    }

    /// Email a one-time code to `user`, starting the MFA step.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error if the code cannot be sent.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start_mfa_challenge(&self, user: &AuthUser) -> Result<(), AppError> {
        let attempt = async {
            self.api
                .send_email_otp(&user.email)
                .await
                .map_err(rejected)
        };
        self.settle(attempt.await, "auth.startMfaChallenge")?;
        debug!("One-time code sent");
        Ok(())
    }

    /// Drop the session of a sign-in that cannot continue, e.g. when its
    /// one-time code could not be sent. Returns whether the session is gone.
    pub async fn abandon_sign_in(&self) -> bool {
        match self.api.sign_out().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to drop half-finished sign-in");
                false
            }
        }
    }

    /// Complete sign-in with the emailed one-time code.
    ///
    /// # Errors
    ///
    /// - `VALIDATION_ERROR` unless `code` is exactly six digits
    /// - `AUTH_ERROR` (origin `SERVICE`) when there is no current identity
    ///   with an email to verify against
    /// - the mapped provider error when verification fails
    #[instrument(skip_all)]
    pub async fn verify_mfa(&self, code: &str) -> Result<AuthUser, AppError> {
        let attempt = async {
            let code = schemas::mfa_code(code)?;

            let current = self.api.get_user().await;
            let (prior, email) = match current {
                Ok(Some(user)) => match user.email.clone() {
                    Some(email) => (user, email),
                    None => return Err(identity_unavailable(None)),
                },
                Ok(None) => return Err(identity_unavailable(None)),
                Err(e) => return Err(identity_unavailable(Some(&e))),
            };

            let response = self
                .api
                .verify_otp(&email, &code, OtpType::Email)
                .await
                .map_err(rejected)?;

            let verified = response.identity().unwrap_or(&prior);
            Ok::<_, Failure>(AuthUser::from_remote(verified, &email))
        };

        let user = self.settle(attempt.await, "auth.verifyMfa")?;
        info!(user_id = %user.id, "One-time code verified");
        Ok(user)
    }

    /// Start a Google sign-in.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error if the authorize URL cannot be built.
    #[instrument(skip(self))]
    pub fn sign_in_with_google(&self) -> Result<OAuthRedirect, AppError> {
        let attempt = self
            .api
            .authorize_url(OAuthProvider::Google, &self.settings.redirect(CALLBACK_PATH))
            .map(|url| OAuthRedirect { url })
            .map_err(rejected);
        self.settle(attempt, "auth.signInWithGoogle")
    }

    /// Finish a redirect-based sign-in.
    ///
    /// When `callback` is given, the tokens it carries establish the session
    /// first. Returns the current identity, `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error.
    #[instrument(skip_all)]
    pub async fn handle_auth_callback(
        &self,
        callback: Option<&Url>,
    ) -> Result<Option<AuthUser>, AppError> {
        self.complete_auth_callback(callback)
            .await
            .map(|outcome| outcome.user)
    }

    /// [`AuthService::handle_auth_callback`], also telling whether the
    /// redirect established a new session.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error.
    #[instrument(skip_all)]
    pub async fn complete_auth_callback(
        &self,
        callback: Option<&Url>,
    ) -> Result<AuthCallback, AppError> {
        let attempt = async {
            let established = match callback {
                Some(url) => self
                    .api
                    .session_from_redirect(url)
                    .await
                    .map_err(rejected)?
                    .is_some(),
                None => false,
            };

            let user = self.api.get_user().await.map_err(rejected)?;
            Ok::<_, Failure>(AuthCallback {
                user: user.map(|u| AuthUser::from_remote(&u, "")),
                established,
            })
        };
        self.settle(attempt.await, "auth.handleAuthCallback")
    }

    // =========================================================================
    // Account lifecycle
    // =========================================================================

    /// Register a new account. Does not sign the user in.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for invalid input; otherwise the mapped provider
    /// error.
    #[instrument(skip(self, password, confirm_password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AppError> {
        let attempt = async {
            let payload = schemas::sign_up(email, password, confirm_password)?;
            self.api
                .sign_up(
                    payload.email.as_str(),
                    expose(&payload.password),
                    &self.settings.redirect(CALLBACK_PATH),
                )
                .await
                .map_err(rejected)?;
            Ok::<_, Failure>(())
        };
        self.settle(attempt.await, "auth.signUp")?;
        info!("Account registered, confirmation pending");
        Ok(())
    }

    /// Email a password recovery link.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for a malformed email; otherwise the mapped
    /// provider error.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let attempt = async {
            let email = schemas::forgot_password(email)?;
            self.api
                .reset_password_for_email(
                    email.as_str(),
                    &self.settings.redirect(RESET_PASSWORD_PATH),
                )
                .await
                .map_err(rejected)
        };
        self.settle(attempt.await, "auth.forgotPassword")
    }

    /// Set a new password for the current user.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for a short or mismatched password; otherwise the
    /// mapped provider error.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AppError> {
        let attempt = async {
            let payload = schemas::reset_password(password, confirm_password)?;
            self.api
                .update_password(expose(&payload.password))
                .await
                .map_err(rejected)?;
            Ok::<_, Failure>(())
        };
        self.settle(attempt.await, "auth.resetPassword")
    }

    /// Revoke the current session.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let attempt = async { self.api.sign_out().await.map_err(rejected) };
        self.settle(attempt.await, "auth.signOut")?;
        info!("User signed out");
        Ok(())
    }

    /// Restore a persisted session, refreshing it if needed, and report its
    /// identity. Never redirects; safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the mapped provider error.
    #[instrument(skip(self))]
    pub async fn initialize_session(&self) -> Result<Option<AuthUser>, AppError> {
        let attempt = async {
            let session = self.api.restore_session().await.map_err(rejected)?;
            Ok::<_, Failure>(session.map(|s| AuthUser::from_remote(&s.user, "")))
        };
        let user = self.settle(attempt.await, "auth.initializeSession")?;
        debug!(restored = user.is_some(), "Session initialized");
        Ok(user)
    }

    /// Normalize, report and return a failure.
    fn settle<T>(&self, outcome: Result<T, Failure>, context: &str) -> Result<T, AppError> {
        outcome.map_err(|failure| {
            let error = failure.into_app_error();
            self.tracker.track(&error, context);
            error
        })
    }
}

/// A provider failure, already normalized.
fn rejected(error: RemoteError) -> Failure {
    Failure::App(map_auth_error(&error))
}

fn identity_unavailable(cause: Option<&RemoteError>) -> Failure {
    let error = AppError::auth(
        ErrorOrigin::Service,
        "Could not retrieve the user to verify the code.",
    )
    .user_friendly();

    Failure::App(match cause {
        Some(cause) => error.with_detail("remote", remote_details(cause)),
        None => error,
    })
}
