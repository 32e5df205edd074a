//! Integration tests for PipeCRM.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pipecrm-integration-tests
//! ```
//!
//! The tests drive a full [`AppContext`] (store, router and services) over
//! the in-memory backend from `pipecrm_client::testing`, so they need no
//! network and no credentials.
//!
//! # Test Categories
//!
//! - `auth_flow` - Sign-in, MFA, OAuth callback, recovery and sign-out
//! - `navigation_guard` - Route guard decisions through the router
//! - `dashboard_metrics` - Dashboard aggregation over seeded rows
//! - `pipeline_board` - Default pipeline and board moves

use std::sync::Arc;

use pipecrm_client::AppContext;
use pipecrm_client::models::AuthUser;
use pipecrm_client::services::auth::AuthSettings;
use pipecrm_client::supabase::{MemoryStorage, SessionStorage};
use pipecrm_client::testing::{InMemoryBackend, RecordingSink};
use pipecrm_client::tracking::ErrorTracker;

/// Public origin the test app runs under.
pub const SITE_URL: &str = "http://localhost:5173";

/// Password of the accounts created by [`TestContext::register`].
pub const PASSWORD: &str = "secret123";

/// One app wired to an in-memory backend.
pub struct TestContext {
    pub backend: InMemoryBackend,
    pub storage: Arc<MemoryStorage>,
    pub sink: Arc<RecordingSink>,
    pub app: AppContext<InMemoryBackend>,
    require_email_otp: bool,
}

impl TestContext {
    /// App with password-only sign-in.
    #[must_use]
    pub fn new() -> Self {
        Self::build(InMemoryBackend::new(), Arc::new(MemoryStorage::new()), false)
    }

    /// App that follows password sign-in with an emailed code.
    #[must_use]
    pub fn with_email_otp() -> Self {
        Self::build(InMemoryBackend::new(), Arc::new(MemoryStorage::new()), true)
    }

    /// A fresh app over the same backend and storage, as after a reload.
    #[must_use]
    pub fn reload(&self) -> Self {
        Self::build(
            self.backend.clone(),
            Arc::clone(&self.storage),
            self.require_email_otp,
        )
    }

    fn build(backend: InMemoryBackend, storage: Arc<MemoryStorage>, require_email_otp: bool) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let tracker = ErrorTracker::new(sink.clone());
        let settings = AuthSettings {
            site_url: SITE_URL.to_string(),
            require_email_otp,
        };
        let shared: Arc<dyn SessionStorage> = storage.clone();
        let app = AppContext::with_backend(backend.clone(), tracker, settings, Some(shared));

        Self {
            backend,
            storage,
            sink,
            app,
            require_email_otp,
        }
    }

    /// Create an account with [`PASSWORD`].
    pub fn register(&self, email: &str) {
        self.backend.register_user(email, PASSWORD);
    }

    /// Register `email` and sign in through the store.
    ///
    /// # Panics
    ///
    /// If the sign-in does not leave a user in the store.
    pub async fn signed_in(&self, email: &str) -> AuthUser {
        self.register(email);
        self.app.store().sign_in(email, PASSWORD).await;
        self.app
            .store()
            .user()
            .unwrap_or_else(|| panic!("sign-in failed: {:?}", self.app.store().error()))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
