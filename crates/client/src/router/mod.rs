//! In-process router.
//!
//! Every navigation resolves against the route table and passes through
//! the guard before it lands. The guard consults the auth store; the first
//! navigation also restores the persisted session.
//!
//! # Guard order
//!
//! 0. Clear the store's error
//! 1. Bootstrap the session (once per router)
//! 2. [`guard::decide`] on the store's state

mod bootstrap;
mod guard;
mod routes;

pub use bootstrap::{BootstrapState, SessionBootstrap};
pub use guard::{RouteGuardDecision, decide};
pub use routes::{
    HOME_PATH, LOGIN_PATH, ROUTES, ResolvedRoute, RouteDef, RouteMeta, RouteName, resolve,
};

use std::sync::Arc;

use pipecrm_core::{AppError, AppErrorCode, ErrorOrigin};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::AuthStore;
use crate::supabase::AuthApi;

/// Redirects followed by one navigation before giving up.
pub const MAX_REDIRECTS: usize = 5;

/// Navigation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("No route matches {0}")]
    NotFound(String),

    #[error("Not an app path: {0}")]
    InvalidPath(String),

    #[error("Too many redirects navigating to {path}")]
    TooManyRedirects { path: String },
}

impl From<RouterError> for AppError {
    fn from(error: RouterError) -> Self {
        let code = match &error {
            RouterError::NotFound(_) | RouterError::InvalidPath(_) => AppErrorCode::NotFound,
            RouterError::TooManyRedirects { .. } => AppErrorCode::Unknown,
        };
        Self::new(code, ErrorOrigin::Ui, error.to_string())
    }
}

/// Where a navigation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub route: ResolvedRoute,
    /// Paths the navigation was redirected away from, in order.
    pub redirected_from: Vec<String>,
}

impl Navigation {
    #[must_use]
    pub fn was_redirected(&self) -> bool {
        !self.redirected_from.is_empty()
    }
}

/// Guarded router.
#[derive(Debug)]
pub struct Router<A> {
    store: Arc<AuthStore<A>>,
    bootstrap: SessionBootstrap,
}

impl<A: AuthApi> Router<A> {
    #[must_use]
    pub fn new(store: Arc<AuthStore<A>>) -> Self {
        Self {
            store,
            bootstrap: SessionBootstrap::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<AuthStore<A>> {
        &self.store
    }

    #[must_use]
    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap.state()
    }

    /// Navigate to `target`, following static and guard redirects.
    ///
    /// # Errors
    ///
    /// `NotFound`/`InvalidPath` when a path does not resolve;
    /// `TooManyRedirects` after [`MAX_REDIRECTS`] hops.
    #[instrument(skip(self))]
    pub async fn navigate(&self, target: &str) -> Result<Navigation, RouterError> {
        let mut redirected_from = Vec::new();
        let mut route = resolve(target)?;

        loop {
            let next = match route.redirect {
                Some(location) => Some(location.to_string()),
                None => {
                    let decision = self.guard(&route).await;
                    debug!(path = %route.full_path, ?decision, "Guard decided");
                    decision.location()
                }
            };

            let Some(next) = next else {
                return Ok(Navigation {
                    route,
                    redirected_from,
                });
            };

            if redirected_from.len() >= MAX_REDIRECTS {
                return Err(RouterError::TooManyRedirects {
                    path: target.to_string(),
                });
            }
            redirected_from.push(route.full_path);
            route = resolve(&next)?;
        }
    }

    /// Run the guard for a navigation to `to`.
    pub async fn guard(&self, to: &ResolvedRoute) -> RouteGuardDecision {
        self.store.clear_error();

        self.bootstrap
            .ensure(|| self.store.initialize_session())
            .await;

        decide(to, &self.store.snapshot())
    }
}
