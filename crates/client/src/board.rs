//! Kanban pipeline board.
//!
//! Holds the deals and stages of one pipeline, groups deals into stage
//! columns and moves deals between columns. Moves are optimistic: the local
//! copy changes first and is refetched if the backend rejects the move.

use pipecrm_core::{AppError, DealId, PipelineId, StageId};
use tracing::{debug, info};

use crate::models::{Deal, DealPatch, DealWithRelations, NewDeal, Stage};
use crate::services::DealsService;
use crate::supabase::DataApi;
use crate::tracking::ErrorTracker;
use crate::view_state::settle;

/// Deals of one pipeline, grouped by stage.
#[derive(Debug)]
pub struct PipelineBoard<D> {
    service: DealsService<D>,
    tracker: ErrorTracker,
    pipeline_id: Option<PipelineId>,
    deals: Vec<DealWithRelations>,
    stages: Vec<Stage>,
    loading_deals: bool,
    loading_stages: bool,
    error: Option<AppError>,
    dragging: Option<DealId>,
}

impl<D: DataApi> PipelineBoard<D> {
    /// Empty board. With `pipeline_id`, only that pipeline's deals load.
    #[must_use]
    pub const fn new(
        service: DealsService<D>,
        tracker: ErrorTracker,
        pipeline_id: Option<PipelineId>,
    ) -> Self {
        Self {
            service,
            tracker,
            pipeline_id,
            deals: Vec::new(),
            stages: Vec::new(),
            loading_deals: false,
            loading_stages: false,
            error: None,
            dragging: None,
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Reload the deals.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept on the board.
    pub async fn load_deals(&mut self) -> Result<(), AppError> {
        self.loading_deals = true;
        self.error = None;
        let outcome = self.fetch_deals("board.loadDeals").await;
        self.loading_deals = false;
        outcome
    }

    /// Load the columns of `pipeline_id`.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept on the board.
    pub async fn load_stages(&mut self, pipeline_id: PipelineId) -> Result<(), AppError> {
        self.loading_stages = true;
        self.error = None;

        let outcome = settle(
            self.service.stages(pipeline_id).await,
            &self.tracker,
            "board.loadStages",
        );
        self.loading_stages = false;

        match outcome {
            Ok(stages) => {
                self.stages = stages;
                Ok(())
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a deal, then reload.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept on the board.
    pub async fn create_deal(&mut self, deal: &NewDeal) -> Result<Deal, AppError> {
        self.loading_deals = true;
        self.error = None;
        let created = settle(
            self.service.create(deal).await,
            &self.tracker,
            "board.createDeal",
        );
        let outcome = self.after_mutation(created).await;
        self.loading_deals = false;
        outcome
    }

    /// Update a deal, then reload.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept on the board.
    pub async fn update_deal(&mut self, id: DealId, patch: &DealPatch) -> Result<Deal, AppError> {
        self.loading_deals = true;
        self.error = None;
        let updated = settle(
            self.service.update(id, patch).await,
            &self.tracker,
            "board.updateDeal",
        );
        let outcome = self.after_mutation(updated).await;
        self.loading_deals = false;
        outcome
    }

    /// Delete a deal, then reload.
    ///
    /// # Errors
    ///
    /// Returns the mapped error, which is also kept on the board.
    pub async fn delete_deal(&mut self, id: DealId) -> Result<(), AppError> {
        self.loading_deals = true;
        self.error = None;
        let deleted = settle(
            self.service.delete(id).await,
            &self.tracker,
            "board.deleteDeal",
        );
        let outcome = self.after_mutation(deleted).await;
        self.loading_deals = false;
        outcome
    }

    /// Move a deal to `stage_id` of `pipeline_id`.
    ///
    /// The local copy moves immediately. If the backend rejects the move the
    /// deals are refetched and the error is kept on the board; the error is
    /// not returned.
    pub async fn move_deal_to_stage(
        &mut self,
        deal_id: DealId,
        pipeline_id: PipelineId,
        stage_id: StageId,
    ) {
        let stage = self.stages.iter().find(|s| s.id == stage_id).cloned();
        if let Some(row) = self.deals.iter_mut().find(|d| d.deal.id == deal_id) {
            row.deal.pipeline_id = pipeline_id;
            row.deal.stage_id = stage_id;
            if stage.is_some() {
                row.stage = stage;
            }
        }

        let moved = settle(
            self.service.move_deal(deal_id, pipeline_id, stage_id).await,
            &self.tracker,
            "board.moveDealToStage",
        );

        if let Err(error) = moved {
            info!(%deal_id, "Move rejected, restoring board");
            // A failed refetch is reported under its own context; the move
            // error stays the one shown.
            let _ = self.fetch_deals("board.loadDeals").await;
            self.error = Some(error);
        }
    }

    // =========================================================================
    // Dragging
    // =========================================================================

    /// Start dragging `deal_id`. Ignored (returns `false`) for deals not on
    /// the board.
    pub fn start_dragging(&mut self, deal_id: DealId) -> bool {
        let known = self.deals.iter().any(|d| d.deal.id == deal_id);
        if known {
            self.dragging = Some(deal_id);
        }
        known
    }

    pub fn stop_dragging(&mut self) {
        self.dragging = None;
    }

    #[must_use]
    pub const fn dragging(&self) -> Option<DealId> {
        self.dragging
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Deals grouped under each stage, in stage order. Deals whose stage is
    /// not on the board are left out.
    #[must_use]
    pub fn deals_by_stage(&self) -> Vec<(&Stage, Vec<&DealWithRelations>)> {
        self.stages
            .iter()
            .map(|stage| {
                let deals = self
                    .deals
                    .iter()
                    .filter(|d| d.deal.stage_id == stage.id)
                    .collect();
                (stage, deals)
            })
            .collect()
    }

    #[must_use]
    pub fn deals(&self) -> &[DealWithRelations] {
        &self.deals
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub const fn loading_deals(&self) -> bool {
        self.loading_deals
    }

    #[must_use]
    pub const fn loading_stages(&self) -> bool {
        self.loading_stages
    }

    #[must_use]
    pub const fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(AppError::message)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn fetch_deals(&mut self, context: &str) -> Result<(), AppError> {
        let outcome = settle(
            self.service.list(self.pipeline_id).await,
            &self.tracker,
            context,
        );
        match outcome {
            Ok(deals) => {
                debug!(count = deals.len(), "Board deals loaded");
                self.deals = deals;
                Ok(())
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    async fn after_mutation<T>(&mut self, outcome: Result<T, AppError>) -> Result<T, AppError> {
        match outcome {
            Ok(value) => {
                self.fetch_deals("board.loadDeals").await?;
                Ok(value)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    fn fail(&mut self, error: AppError) -> AppError {
        self.error = Some(error.clone());
        error
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::AuthUser;
    use crate::services::PipelinesService;
    use crate::services::deals::DEALS_TABLE;
    use crate::supabase::RemoteError;
    use crate::testing::InMemoryBackend;
    use pipecrm_core::{AppErrorCode, DealStatus, UserId};
    use rust_decimal::Decimal;

    async fn board() -> (InMemoryBackend, PipelineBoard<InMemoryBackend>, PipelineId) {
        let backend = InMemoryBackend::new();
        let owner = AuthUser {
            id: UserId::random(),
            email: "ana@pipecrm.dev".into(),
            is_admin: false,
        };
        let pipeline = PipelinesService::new(backend.clone())
            .get_or_create_default(&owner)
            .await
            .unwrap();

        let mut board = PipelineBoard::new(
            DealsService::new(backend.clone()),
            ErrorTracker::disabled(),
            Some(pipeline.id),
        );
        board.load_stages(pipeline.id).await.unwrap();

        let first_stage = board.stages()[0].id;
        for title in ["Acme", "Globex"] {
            board
                .create_deal(&NewDeal {
                    title: title.into(),
                    amount: Decimal::from(1000),
                    stage_id: first_stage,
                    pipeline_id: pipeline.id,
                    company_id: None,
                    contact_id: None,
                    owner_id: owner.id,
                    status: DealStatus::Open,
                })
                .await
                .unwrap();
        }

        (backend, board, pipeline.id)
    }

    #[tokio::test]
    async fn test_deals_grouped_by_stage() {
        let (_backend, board, _) = board().await;

        let columns = board.deals_by_stage();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0].0.name, "Prospecção");
        assert_eq!(columns[0].1.len(), 2);
        assert!(columns[1..].iter().all(|(_, deals)| deals.is_empty()));
    }

    #[tokio::test]
    async fn test_move_deal_to_stage() {
        let (backend, mut board, pipeline_id) = board().await;
        let deal_id = board.deals()[0].deal.id;
        let target = board.stages()[2].id;

        board.move_deal_to_stage(deal_id, pipeline_id, target).await;

        assert!(board.error().is_none());
        let columns = board.deals_by_stage();
        assert_eq!(columns[2].1.len(), 1);
        assert_eq!(columns[2].1[0].deal.id, deal_id);

        let stored = backend
            .rows(DEALS_TABLE)
            .into_iter()
            .find(|row| row["id"] == deal_id.to_string())
            .unwrap();
        assert_eq!(stored["stage_id"], target.to_string());
    }

    #[tokio::test]
    async fn test_rejected_move_is_rolled_back() {
        let (backend, mut board, pipeline_id) = board().await;
        let deal_id = board.deals()[0].deal.id;
        let original = board.deals()[0].deal.stage_id;
        let target = board.stages()[3].id;

        backend.fail_writes(DEALS_TABLE, RemoteError::api(403, "PGRST301", "denied"));
        board.move_deal_to_stage(deal_id, pipeline_id, target).await;

        assert_eq!(
            board.error().map(AppError::code),
            Some(AppErrorCode::Forbidden)
        );
        let restored = board
            .deals()
            .iter()
            .find(|d| d.deal.id == deal_id)
            .unwrap();
        assert_eq!(restored.deal.stage_id, original);
    }

    #[tokio::test]
    async fn test_dragging_only_known_deals() {
        let (_backend, mut board, _) = board().await;
        let deal_id = board.deals()[0].deal.id;

        assert!(!board.start_dragging(DealId::random()));
        assert_eq!(board.dragging(), None);

        assert!(board.start_dragging(deal_id));
        assert_eq!(board.dragging(), Some(deal_id));

        board.stop_dragging();
        assert_eq!(board.dragging(), None);
    }
}
