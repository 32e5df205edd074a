//! Auth state store.
//!
//! The only writer of [`AuthStoreState`]. One instance is built at startup
//! and shared (behind an `Arc`) with the router and the front-end; state is
//! read through getters or observed through [`AuthStore::subscribe`], and
//! changed only through the named actions below.
//!
//! Each async action runs the same protocol: mark loading and clear the
//! error, call the auth service, commit the outcome, clear loading. Actions
//! may overlap; every action takes a ticket and only the most recent one
//! commits, so a slow stale action cannot overwrite a newer outcome or
//! leave `loading` stuck.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pipecrm_core::AppError;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::models::AuthUser;
use crate::services::auth::{AuthCallback, AuthService, OAuthRedirect};
use crate::supabase::{AuthApi, IS_AUTHENTICATED_KEY, SessionStorage};
use crate::tracking::ErrorTracker;

/// Storage flag marking a sign-in that still awaits its one-time code, so a
/// restored session does not skip the MFA step.
pub const MFA_PENDING_KEY: &str = "requiresMfa";

/// Observable auth state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStoreState {
    pub user: Option<AuthUser>,
    /// True only while an action is in flight.
    pub loading: bool,
    pub error: Option<AppError>,
    /// Credentials accepted, emailed code not yet verified.
    pub requires_mfa: bool,
}

/// How a password sign-in ended.
enum SignIn {
    Complete(AuthUser),
    AwaitingCode,
    Failed {
        error: AppError,
        /// The password session could not be dropped, so the MFA step
        /// stays pending.
        mfa_pending: bool,
    },
}

/// Auth state store.
pub struct AuthStore<A> {
    service: AuthService<A>,
    tracker: ErrorTracker,
    storage: Option<Arc<dyn SessionStorage>>,
    state: watch::Sender<AuthStoreState>,
    latest: AtomicU64,
}

impl<A> std::fmt::Debug for AuthStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<A: AuthApi> AuthStore<A> {
    /// Create a store with an empty state.
    ///
    /// When `storage` is given, every user change mirrors the legacy
    /// `isAuthenticated` flag (`"1"`/`"0"`) into it, along with the
    /// pending-MFA flag.
    #[must_use]
    pub fn new(
        service: AuthService<A>,
        tracker: ErrorTracker,
        storage: Option<Arc<dyn SessionStorage>>,
    ) -> Self {
        Self {
            service,
            tracker,
            storage,
            state: watch::Sender::new(AuthStoreState::default()),
            latest: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> AuthStoreState {
        self.state.borrow().clone()
    }

    /// Receive every later state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthStoreState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<AuthUser> {
        self.state.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().user.is_some()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.state.borrow().user.as_ref().is_some_and(|u| u.is_admin)
    }

    #[must_use]
    pub fn requires_mfa(&self) -> bool {
        self.state.borrow().requires_mfa
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    #[must_use]
    pub fn error(&self) -> Option<AppError> {
        self.state.borrow().error.clone()
    }

    /// Message of the current error, for display.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.state
            .borrow()
            .error
            .as_ref()
            .map(|e| e.message().to_string())
    }

    // =========================================================================
    // Synchronous actions
    // =========================================================================

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// Replace the user directly.
    pub fn set_user(&self, user: Option<AuthUser>) {
        self.state.send_modify(|state| state.user = user);
        self.mirror(&self.snapshot());
    }

    // =========================================================================
    // Async actions
    // =========================================================================

    /// Sign in with email and password.
    ///
    /// When the one-time-code policy is on, a successful password check
    /// emails a code and leaves the store unauthenticated with
    /// `requires_mfa` set. If the code cannot be sent, the password session
    /// is dropped again.
    pub async fn sign_in(&self, email: &str, password: &str) {
        let pending = self.begin();

        let outcome = match self.service.sign_in(email, password).await {
            Ok(user) if self.service.requires_mfa() => self.challenge(&user).await,
            Ok(user) => SignIn::Complete(user),
            Err(error) => SignIn::Failed {
                error,
                mfa_pending: false,
            },
        };

        pending.finish(|state| match outcome {
            SignIn::Complete(user) => {
                state.user = Some(user);
                state.requires_mfa = false;
            }
            SignIn::AwaitingCode => {
                state.user = None;
                state.requires_mfa = true;
            }
            SignIn::Failed { error, mfa_pending } => {
                state.error = Some(error);
                state.user = None;
                state.requires_mfa = mfa_pending;
            }
        });
    }

    /// Register a new account. The user stays signed out.
    pub async fn sign_up(&self, email: &str, password: &str, confirm_password: &str) {
        let pending = self.begin();
        let outcome = self
            .service
            .sign_up(email, password, confirm_password)
            .await;
        pending.finish(|state| {
            if let Err(error) = outcome {
                state.error = Some(error);
            }
        });
    }

    /// Start a Google sign-in. Returns where to send the user, `None` on
    /// failure (see [`AuthStore::error`]).
    pub fn sign_in_with_google(&self) -> Option<OAuthRedirect> {
        let pending = self.begin();
        let outcome = self.service.sign_in_with_google();
        let redirect = outcome.as_ref().ok().cloned();
        pending.finish(|state| {
            if let Err(error) = outcome {
                state.error = Some(error);
            }
        });
        redirect
    }

    /// Complete sign-in with the emailed one-time code.
    pub async fn verify_mfa(&self, code: &str) {
        let pending = self.begin();
        let outcome = self.service.verify_mfa(code).await;
        pending.finish(|state| match outcome {
            Ok(user) => {
                state.user = Some(user);
                state.requires_mfa = false;
            }
            Err(error) => state.error = Some(error),
        });
    }

    /// Email a password recovery link.
    pub async fn forgot_password(&self, email: &str) {
        let pending = self.begin();
        let outcome = self.service.forgot_password(email).await;
        pending.finish(|state| {
            if let Err(error) = outcome {
                state.error = Some(error);
            }
        });
    }

    /// Set a new password for the current user.
    pub async fn reset_password(&self, password: &str, confirm_password: &str) {
        let pending = self.begin();
        let outcome = self
            .service
            .reset_password(password, confirm_password)
            .await;
        pending.finish(|state| {
            if let Err(error) = outcome {
                state.error = Some(error);
            }
        });
    }

    /// Finish a redirect-based sign-in; see
    /// [`AuthService::handle_auth_callback`].
    ///
    /// While a one-time code is pending, only a redirect that carries a new
    /// session signs the user in.
    pub async fn handle_auth_callback(&self, callback: Option<&Url>) {
        let mfa_pending = self.requires_mfa() || self.stored_flag(MFA_PENDING_KEY);
        let pending = self.begin();
        let outcome = self.service.complete_auth_callback(callback).await;
        pending.finish(|state| match outcome {
            Ok(AuthCallback {
                established: false,
                ..
            }) if mfa_pending => {
                debug!("Callback without a new session, one-time code still pending");
                state.user = None;
                state.requires_mfa = true;
            }
            Ok(AuthCallback { user, .. }) => {
                state.user = user;
                state.requires_mfa = false;
            }
            Err(error) => state.error = Some(error),
        });
    }

    /// Sign out. On failure the user is kept and the error stored.
    pub async fn sign_out(&self) {
        let pending = self.begin();
        let outcome = self.service.sign_out().await;
        pending.finish(|state| match outcome {
            Ok(()) => {
                state.user = None;
                state.requires_mfa = false;
            }
            Err(error) => state.error = Some(error),
        });
    }

    /// Restore a persisted session. On failure the user is cleared.
    ///
    /// A session restored while a one-time code is still pending puts the
    /// store back into the MFA step instead of signing the user in.
    pub async fn initialize_session(&self) {
        let pending = self.begin();
        let outcome = self.service.initialize_session().await;
        let mfa_pending = self.stored_flag(MFA_PENDING_KEY);
        pending.finish(|state| match outcome {
            Ok(Some(_)) if mfa_pending => {
                state.user = None;
                state.requires_mfa = true;
            }
            Ok(user) => state.user = user,
            Err(error) => {
                state.error = Some(error);
                state.user = None;
            }
        });
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Send the one-time code for a password sign-in.
    async fn challenge(&self, user: &AuthUser) -> SignIn {
        // The password session is already persisted; mark the step pending
        // before anything can fail.
        self.set_flag(MFA_PENDING_KEY, true);

        match self.service.start_mfa_challenge(user).await {
            Ok(()) => SignIn::AwaitingCode,
            Err(error) => {
                let dropped = self.service.abandon_sign_in().await;
                SignIn::Failed {
                    error,
                    mfa_pending: !dropped,
                }
            }
        }
    }

    /// Take a ticket and mark the action in flight.
    fn begin(&self) -> Pending<'_, A> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        Pending {
            store: self,
            ticket,
        }
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket
    }

    /// Mirror the user into the error tracker and the storage flags.
    fn mirror(&self, state: &AuthStoreState) {
        self.tracker.identify(state.user.as_ref());
        self.set_flag(IS_AUTHENTICATED_KEY, state.user.is_some());
        self.set_flag(MFA_PENDING_KEY, state.requires_mfa);
    }

    fn set_flag(&self, key: &str, on: bool) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.set_flag(key, if on { "1" } else { "0" }) {
            warn!(error = %e, key, "Failed to mirror auth flag");
        }
    }

    fn stored_flag(&self, key: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        match storage.flag(key) {
            Ok(value) => value.as_deref() == Some("1"),
            Err(e) => {
                warn!(error = %e, key, "Failed to read auth flag");
                false
            }
        }
    }
}

/// An action in flight. Dropping it without [`Pending::finish`] (for
/// example when the action's future is cancelled) still clears `loading`.
struct Pending<'a, A: AuthApi> {
    store: &'a AuthStore<A>,
    ticket: u64,
}

impl<A: AuthApi> Pending<'_, A> {
    /// Commit the outcome, unless a newer action has started since.
    fn finish(self, apply: impl FnOnce(&mut AuthStoreState)) {
        let store = self.store;
        if !store.is_latest(self.ticket) {
            debug!(ticket = self.ticket, "Discarding superseded auth action");
            return;
        }

        store.state.send_modify(|state| {
            apply(state);
            state.loading = false;
        });
        store.mirror(&store.snapshot());
    }
}

impl<A: AuthApi> Drop for Pending<'_, A> {
    fn drop(&mut self) {
        if self.store.is_latest(self.ticket) {
            self.store
                .state
                .send_if_modified(|state| std::mem::replace(&mut state.loading, false));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::auth::AuthSettings;
    use crate::supabase::MemoryStorage;
    use crate::testing::{InMemoryBackend, RecordingSink};
    use crate::supabase::RemoteError;
    use pipecrm_core::{AppErrorCode, ErrorOrigin, UserId};

    struct Fixture {
        backend: InMemoryBackend,
        storage: Arc<MemoryStorage>,
        sink: Arc<RecordingSink>,
        store: AuthStore<InMemoryBackend>,
    }

    fn fixture(require_email_otp: bool) -> Fixture {
        let backend = InMemoryBackend::new();
        backend.register_user("ana@pipecrm.dev", "secret1");

        let storage = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::default());
        let tracker = ErrorTracker::new(sink.clone());
        let service = AuthService::new(
            backend.clone(),
            tracker.clone(),
            AuthSettings {
                site_url: "http://localhost:5173".into(),
                require_email_otp,
            },
        );
        let shared: Arc<dyn SessionStorage> = storage.clone();
        let store = AuthStore::new(service, tracker, Some(shared));

        Fixture {
            backend,
            storage,
            sink,
            store,
        }
    }

    fn flag(storage: &MemoryStorage) -> Option<String> {
        storage.flag(IS_AUTHENTICATED_KEY).unwrap()
    }

    /// A new store over the same backend and storage, as in a new process.
    fn reopened(f: &Fixture) -> AuthStore<InMemoryBackend> {
        let service = AuthService::new(
            f.backend.clone(),
            ErrorTracker::disabled(),
            AuthSettings {
                site_url: "http://localhost:5173".into(),
                require_email_otp: true,
            },
        );
        let shared: Arc<dyn SessionStorage> = f.storage.clone();
        AuthStore::new(service, ErrorTracker::disabled(), Some(shared))
    }

    fn mfa_flag(storage: &MemoryStorage) -> Option<String> {
        storage.flag(MFA_PENDING_KEY).unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_success() {
        let f = fixture(false);
        f.store.sign_in("ana@pipecrm.dev", "secret1").await;

        let state = f.store.snapshot();
        assert_eq!(state.user.as_ref().unwrap().email, "ana@pipecrm.dev");
        assert!(!state.loading);
        assert!(state.error.is_none());
        assert!(f.store.is_authenticated());
        assert_eq!(flag(&f.storage).as_deref(), Some("1"));
        assert_eq!(
            f.sink.users().last().cloned().flatten().as_deref(),
            Some("ana@pipecrm.dev")
        );
    }

    #[tokio::test]
    async fn test_failed_sign_in() {
        let f = fixture(false);
        f.store.sign_in("ana@pipecrm.dev", "wrong-password").await;

        let state = f.store.snapshot();
        assert!(state.user.is_none());
        assert!(!state.loading);
        assert_eq!(state.error.map(|e| e.code()), Some(AppErrorCode::Auth));
        assert_eq!(
            f.store.error_message().as_deref(),
            Some("Invalid email or password.")
        );
        assert_eq!(flag(&f.storage).as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_backend() {
        let f = fixture(false);
        f.store.sign_in("not-an-email", "123").await;

        assert_eq!(
            f.store.error().map(|e| e.code()),
            Some(AppErrorCode::Validation)
        );
        assert!(f.backend.auth_calls().is_empty());
        // Expected validation failures are not reported.
        assert!(f.sink.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_mfa_policy() {
        let f = fixture(true);
        f.store.sign_in("ana@pipecrm.dev", "secret1").await;

        assert!(f.store.requires_mfa());
        assert!(!f.store.is_authenticated());
        assert_eq!(f.backend.sent_codes(), vec!["ana@pipecrm.dev".to_string()]);

        f.store.verify_mfa("000000").await;
        assert!(!f.store.is_authenticated());
        assert!(f.store.requires_mfa());
        assert_eq!(f.store.error().map(|e| e.code()), Some(AppErrorCode::Server));

        f.store.verify_mfa("123456").await;
        assert!(f.store.is_authenticated());
        assert!(!f.store.requires_mfa());
        assert!(f.store.error().is_none());
    }

    #[tokio::test]
    async fn test_restored_session_keeps_mfa_step() {
        let f = fixture(true);
        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        assert_eq!(f.storage.flag(MFA_PENDING_KEY).unwrap().as_deref(), Some("1"));

        let restored = reopened(&f);
        restored.initialize_session().await;
        assert!(restored.requires_mfa());
        assert!(!restored.is_authenticated());

        restored.verify_mfa("123456").await;
        assert!(restored.is_authenticated());
        assert_eq!(f.storage.flag(MFA_PENDING_KEY).unwrap().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_unsent_code_drops_password_session() {
        let f = fixture(true);
        f.backend
            .fail_auth_call("send_email_otp", RemoteError::auth(429, "Too many requests"));

        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        assert!(f.store.error().is_some());
        assert!(!f.store.is_authenticated());
        assert!(!f.store.requires_mfa());
        assert!(f.backend.session().is_none());
        assert_eq!(mfa_flag(&f.storage).as_deref(), Some("0"));

        let restored = reopened(&f);
        restored.initialize_session().await;
        assert!(!restored.is_authenticated());
    }

    #[tokio::test]
    async fn test_unsent_code_keeps_mfa_step_when_session_survives() {
        let f = fixture(true);
        f.backend
            .fail_auth_call("send_email_otp", RemoteError::auth(429, "Too many requests"));
        f.backend
            .fail_auth_call("sign_out", RemoteError::Transport("offline".into()));

        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        assert!(f.store.error().is_some());
        assert!(f.store.requires_mfa());
        assert!(f.backend.session().is_some());
        assert_eq!(mfa_flag(&f.storage).as_deref(), Some("1"));

        let restored = reopened(&f);
        restored.initialize_session().await;
        assert!(!restored.is_authenticated());
        assert!(restored.requires_mfa());
    }

    #[tokio::test]
    async fn test_callback_without_session_keeps_mfa_step() {
        let f = fixture(true);
        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        assert!(f.store.requires_mfa());

        let bare = Url::parse("http://localhost:5173/auth/callback").unwrap();
        f.store.handle_auth_callback(Some(&bare)).await;
        assert!(!f.store.is_authenticated());
        assert!(f.store.requires_mfa());

        f.store.handle_auth_callback(None).await;
        assert!(!f.store.is_authenticated());
        assert_eq!(mfa_flag(&f.storage).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_verify_mfa_without_identity() {
        let f = fixture(true);
        f.store.verify_mfa("123456").await;

        let error = f.store.error().unwrap();
        assert_eq!(error.code(), AppErrorCode::Auth);
        assert_eq!(error.origin(), ErrorOrigin::Service);
        assert!(f.store.user().is_none());
        assert_eq!(f.sink.contexts(), vec!["auth.verifyMfa".to_string()]);
    }

    #[tokio::test]
    async fn test_sign_in_without_identity() {
        let f = fixture(false);
        f.backend.omit_next_identity();

        f.store.sign_in("ana@pipecrm.dev", "secret1").await;

        let error = f.store.error().unwrap();
        assert_eq!(error.code(), AppErrorCode::Server);
        assert_eq!(error.origin(), ErrorOrigin::Service);
        assert_eq!(error.message(), "Invalid session after sign-in.");
        assert!(f.store.user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out() {
        let f = fixture(false);
        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        f.store.sign_out().await;

        assert!(!f.store.is_authenticated());
        assert!(f.backend.session().is_none());
        assert_eq!(flag(&f.storage).as_deref(), Some("0"));
        assert_eq!(f.sink.users().last().cloned(), Some(None));
    }

    #[tokio::test]
    async fn test_initialize_session_is_idempotent() {
        let f = fixture(false);
        f.backend.sign_in_as("ana@pipecrm.dev").unwrap();

        f.store.initialize_session().await;
        let first = f.store.user();
        f.store.initialize_session().await;

        assert!(first.is_some());
        assert_eq!(f.store.user(), first);
    }

    #[tokio::test]
    async fn test_failed_restore_clears_user() {
        let f = fixture(false);
        f.store.set_user(Some(AuthUser {
            id: UserId::random(),
            email: "ana@pipecrm.dev".into(),
            is_admin: false,
        }));
        f.backend
            .fail_next_auth(RemoteError::Transport("offline".into()));

        f.store.initialize_session().await;
        assert!(f.store.user().is_none());
        assert_eq!(f.store.error().map(|e| e.code()), Some(AppErrorCode::Network));
    }

    #[tokio::test]
    async fn test_clear_error() {
        let f = fixture(false);
        f.store.sign_in("ana@pipecrm.dev", "wrong-password").await;
        assert!(f.store.error().is_some());

        f.store.clear_error();
        assert!(f.store.error().is_none());
    }

    #[test]
    fn test_superseded_action_is_discarded() {
        let f = fixture(false);
        let user = AuthUser {
            id: UserId::random(),
            email: "ana@pipecrm.dev".into(),
            is_admin: false,
        };

        let stale = f.store.begin();
        let latest = f.store.begin();

        stale.finish(|state| state.user = Some(user));
        assert!(f.store.user().is_none());
        assert!(f.store.loading());

        latest.finish(|_| {});
        assert!(!f.store.loading());
        assert!(f.store.user().is_none());
    }

    #[test]
    fn test_cancelled_action_clears_loading() {
        let f = fixture(false);
        let pending = f.store.begin();
        assert!(f.store.loading());

        drop(pending);
        assert!(!f.store.loading());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let f = fixture(false);
        let mut updates = f.store.subscribe();

        f.store.sign_in("ana@pipecrm.dev", "secret1").await;
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().user.is_some());
    }
}
