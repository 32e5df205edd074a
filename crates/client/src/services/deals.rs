//! Deals and their pipeline stages.

use pipecrm_core::{DealId, PipelineId, StageId};
use tracing::instrument;

use crate::models::{Deal, DealPatch, DealWithRelations, NewDeal, Stage};
use crate::supabase::{DataApi, Query, RemoteError};

/// Table holding deals.
pub const DEALS_TABLE: &str = "deals";

/// Table holding the columns of each pipeline.
pub const STAGES_TABLE: &str = "pipeline_stages";

/// Select clause embedding a deal's stage and pipeline.
const WITH_RELATIONS: &str = "*, stage:pipeline_stages(*), pipeline:pipelines(*)";

/// Deal operations.
#[derive(Debug, Clone)]
pub struct DealsService<D> {
    api: D,
}

impl<D: DataApi> DealsService<D> {
    /// Create a new deals service.
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// Deals newest first, with stage and pipeline embedded. Restricted to
    /// one pipeline when `pipeline_id` is given.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        pipeline_id: Option<PipelineId>,
    ) -> Result<Vec<DealWithRelations>, RemoteError> {
        let mut query = Query::table(DEALS_TABLE)
            .select(WITH_RELATIONS)
            .order("created_at", false);
        if let Some(pipeline_id) = pipeline_id {
            query = query.eq("pipeline_id", pipeline_id);
        }
        self.api.select(&query).await
    }

    /// One deal with its relations.
    ///
    /// # Errors
    ///
    /// `PGRST116` when no such deal is visible; otherwise the backend error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: DealId) -> Result<DealWithRelations, RemoteError> {
        let query = Query::table(DEALS_TABLE)
            .select(WITH_RELATIONS)
            .eq("id", id);
        self.api.select_single(&query).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip_all, fields(title = %deal.title))]
    pub async fn create(&self, deal: &NewDeal) -> Result<Deal, RemoteError> {
        self.api.insert(DEALS_TABLE, deal).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: DealId, patch: &DealPatch) -> Result<Deal, RemoteError> {
        let query = Query::table(DEALS_TABLE).eq("id", id);
        self.api.update(&query, patch).await
    }

    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: DealId) -> Result<(), RemoteError> {
        self.api.delete(&Query::table(DEALS_TABLE).eq("id", id)).await
    }

    /// Stages of `pipeline_id` in board order.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn stages(&self, pipeline_id: PipelineId) -> Result<Vec<Stage>, RemoteError> {
        let query = Query::table(STAGES_TABLE)
            .eq("pipeline_id", pipeline_id)
            .order("position", true);
        self.api.select(&query).await
    }

    /// Move a deal to another stage (and pipeline).
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip(self))]
    pub async fn move_deal(
        &self,
        id: DealId,
        pipeline_id: PipelineId,
        stage_id: StageId,
    ) -> Result<Deal, RemoteError> {
        self.update(id, &DealPatch::move_to(pipeline_id, stage_id))
            .await
    }
}
