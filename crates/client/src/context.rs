//! Application context.
//!
//! Owns every long-lived piece of the client: the backend, the error
//! tracker, the services, the auth store and the router. Built once at
//! startup and passed explicitly; nothing here is global.

use std::sync::Arc;

use pipecrm_core::{AppError, PipelineId};
use tracing::info;

use crate::board::PipelineBoard;
use crate::config::ClientConfig;
use crate::router::Router;
use crate::services::auth::{AuthService, AuthSettings};
use crate::services::{
    ActivitiesService, CompaniesService, ContactsService, DashboardService, DealsService,
    PipelinesService,
};
use crate::store::AuthStore;
use crate::supabase::{AuthApi, DataApi, FileStorage, MemoryStorage, SessionStorage, SupabaseClient};
use crate::tracking::ErrorTracker;
use crate::view_state::ResourceState;

/// Shared application context.
///
/// Cheap to clone via `Arc`.
pub struct AppContext<B> {
    inner: Arc<AppContextInner<B>>,
}

impl<B> Clone for AppContext<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for AppContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext").finish_non_exhaustive()
    }
}

struct AppContextInner<B> {
    tracker: ErrorTracker,
    store: Arc<AuthStore<B>>,
    router: Router<B>,
    deals: DealsService<B>,
    contacts: ContactsService<B>,
    companies: CompaniesService<B>,
    activities: ActivitiesService<B>,
    pipelines: PipelinesService<B>,
    dashboard: DashboardService<B>,
}

impl AppContext<SupabaseClient> {
    /// Wire the HTTP client from configuration.
    ///
    /// The session persists to `config.session_file` when set, otherwise it
    /// lives only as long as the process.
    ///
    /// # Errors
    ///
    /// Returns a `CONFIG_ERROR` if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, AppError> {
        let storage: Arc<dyn SessionStorage> = match &config.session_file {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };

        let client = SupabaseClient::new(config, Arc::clone(&storage))
            .map_err(|e| AppError::config(format!("Failed to build the backend client: {e}")))?;
        let tracker = ErrorTracker::from_config(&config.sentry);

        info!(
            backend = %config.supabase_url,
            persistent = config.session_file.is_some(),
            "Client context ready"
        );
        Ok(Self::with_backend(
            client,
            tracker,
            AuthSettings::from_config(config),
            Some(storage),
        ))
    }
}

impl<B: AuthApi + DataApi + Clone> AppContext<B> {
    /// Wire an arbitrary backend.
    #[must_use]
    pub fn with_backend(
        backend: B,
        tracker: ErrorTracker,
        settings: AuthSettings,
        storage: Option<Arc<dyn SessionStorage>>,
    ) -> Self {
        let auth = AuthService::new(backend.clone(), tracker.clone(), settings);
        let store = Arc::new(AuthStore::new(auth, tracker.clone(), storage));
        let router = Router::new(Arc::clone(&store));

        Self {
            inner: Arc::new(AppContextInner {
                tracker,
                router,
                store,
                deals: DealsService::new(backend.clone()),
                contacts: ContactsService::new(backend.clone()),
                companies: CompaniesService::new(backend.clone()),
                activities: ActivitiesService::new(backend.clone()),
                pipelines: PipelinesService::new(backend.clone()),
                dashboard: DashboardService::new(backend),
            }),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &ErrorTracker {
        &self.inner.tracker
    }

    #[must_use]
    pub fn store(&self) -> &Arc<AuthStore<B>> {
        &self.inner.store
    }

    #[must_use]
    pub fn router(&self) -> &Router<B> {
        &self.inner.router
    }

    #[must_use]
    pub fn deals(&self) -> &DealsService<B> {
        &self.inner.deals
    }

    #[must_use]
    pub fn contacts(&self) -> &ContactsService<B> {
        &self.inner.contacts
    }

    #[must_use]
    pub fn companies(&self) -> &CompaniesService<B> {
        &self.inner.companies
    }

    #[must_use]
    pub fn activities(&self) -> &ActivitiesService<B> {
        &self.inner.activities
    }

    #[must_use]
    pub fn pipelines(&self) -> &PipelinesService<B> {
        &self.inner.pipelines
    }

    #[must_use]
    pub fn dashboard(&self) -> &DashboardService<B> {
        &self.inner.dashboard
    }

    /// A fresh board over `pipeline_id` (every pipeline when `None`).
    #[must_use]
    pub fn board(&self, pipeline_id: Option<PipelineId>) -> PipelineBoard<B> {
        PipelineBoard::new(
            self.inner.deals.clone(),
            self.inner.tracker.clone(),
            pipeline_id,
        )
    }

    /// Empty view state reporting under `context`.
    #[must_use]
    pub fn resource<T>(&self, context: &str) -> ResourceState<T> {
        ResourceState::new(self.inner.tracker.clone(), context)
    }
}
