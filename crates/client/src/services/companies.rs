//! Companies.

use pipecrm_core::CompanyId;
use tracing::instrument;

use crate::models::{Company, CompanyPatch, NewCompany};
use crate::supabase::{DataApi, Query, RemoteError};

pub const COMPANIES_TABLE: &str = "companies";

/// Company operations.
#[derive(Debug, Clone)]
pub struct CompaniesService<D> {
    api: D,
}

impl<D: DataApi> CompaniesService<D> {
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// Companies newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Company>, RemoteError> {
        let query = Query::table(COMPANIES_TABLE).order("created_at", false);
        self.api.select(&query).await
    }

    /// # Errors
    ///
    /// `PGRST116` when no such company is visible; otherwise the backend error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: CompanyId) -> Result<Company, RemoteError> {
        self.api
            .select_single(&Query::table(COMPANIES_TABLE).eq("id", id))
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip_all, fields(name = %company.name))]
    pub async fn create(&self, company: &NewCompany) -> Result<Company, RemoteError> {
        self.api.insert(COMPANIES_TABLE, company).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: CompanyId, patch: &CompanyPatch) -> Result<Company, RemoteError> {
        self.api
            .update(&Query::table(COMPANIES_TABLE).eq("id", id), patch)
            .await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: CompanyId) -> Result<(), RemoteError> {
        self.api
            .delete(&Query::table(COMPANIES_TABLE).eq("id", id))
            .await
    }
}
