//! The user's sales pipeline.
//!
//! Every user works in one default pipeline. It is created lazily, with the
//! standard five stages, the first time the board is opened.

use tracing::{info, instrument, warn};

use crate::models::{AuthUser, NewPipeline, NewStage, Pipeline, ProfileRow};
use crate::services::deals::STAGES_TABLE;
use crate::supabase::{DataApi, Query, RemoteError};

pub const PIPELINES_TABLE: &str = "pipelines";
pub const PROFILES_TABLE: &str = "profiles";

/// Name of a freshly created pipeline.
pub const DEFAULT_PIPELINE_NAME: &str = "Pipeline de Vendas";

/// Stages of a freshly created pipeline, in board order.
pub const DEFAULT_STAGES: [&str; 5] = [
    "Prospecção",
    "Qualificação",
    "Proposta",
    "Negociação",
    "Fechamento",
];

/// Pipeline operations.
#[derive(Debug, Clone)]
pub struct PipelinesService<D> {
    api: D,
}

impl<D: DataApi> PipelinesService<D> {
    #[must_use]
    pub const fn new(api: D) -> Self {
        Self { api }
    }

    /// The owner's first pipeline, creating it (with [`DEFAULT_STAGES`]) when
    /// there is none.
    ///
    /// The owner's profile row is upserted first; a failure there is logged
    /// and does not stop the pipeline lookup.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the lookup or of the creation.
    #[instrument(skip_all, fields(user_id = %owner.id))]
    pub async fn get_or_create_default(&self, owner: &AuthUser) -> Result<Pipeline, RemoteError> {
        if let Err(e) = self.ensure_profile(owner).await {
            warn!(error = %e, "Failed to ensure profile row");
        }

        let query = Query::table(PIPELINES_TABLE)
            .eq("owner_id", owner.id)
            .limit(1);
        let existing: Vec<Pipeline> = self.api.select(&query).await?;
        if let Some(pipeline) = existing.into_iter().next() {
            return Ok(pipeline);
        }

        let pipeline: Pipeline = self
            .api
            .insert(
                PIPELINES_TABLE,
                &NewPipeline {
                    name: DEFAULT_PIPELINE_NAME.to_string(),
                    owner_id: owner.id,
                },
            )
            .await?;

        let stages = default_stages(&pipeline);
        self.api.insert_many(STAGES_TABLE, &stages).await?;

        info!(pipeline_id = %pipeline.id, "Default pipeline created");
        Ok(pipeline)
    }

    /// Upsert the owner's profile row.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn ensure_profile(&self, owner: &AuthUser) -> Result<(), RemoteError> {
        let name = if owner.email.is_empty() {
            "User".to_string()
        } else {
            owner.email.clone()
        };

        let row = ProfileRow {
            id: owner.id,
            name,
            avatar_url: None,
            is_admin: false,
        };
        self.api.upsert(PROFILES_TABLE, &row, "id").await
    }
}

fn default_stages(pipeline: &Pipeline) -> Vec<NewStage> {
    DEFAULT_STAGES
        .iter()
        .zip(1..)
        .map(|(name, position)| NewStage {
            name: (*name).to_string(),
            position,
            pipeline_id: pipeline.id,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use crate::services::DealsService;
    use crate::testing::InMemoryBackend;
    use pipecrm_core::UserId;

    fn owner() -> AuthUser {
        AuthUser {
            id: UserId::random(),
            email: "ana@pipecrm.dev".into(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_creates_default_pipeline_with_stages() {
        let backend = InMemoryBackend::new();
        let service = PipelinesService::new(backend.clone());
        let owner = owner();

        let pipeline = service.get_or_create_default(&owner).await.unwrap();
        assert_eq!(pipeline.name, DEFAULT_PIPELINE_NAME);
        assert_eq!(pipeline.owner_id, owner.id);

        let stages: Vec<Stage> = DealsService::new(backend.clone())
            .stages(pipeline.id)
            .await
            .unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, DEFAULT_STAGES);
        assert_eq!(stages[0].position, 1);
        assert_eq!(stages[4].position, 5);

        let profiles = backend.rows(PROFILES_TABLE);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["name"], "ana@pipecrm.dev");
    }

    #[tokio::test]
    async fn test_returns_existing_pipeline() {
        let backend = InMemoryBackend::new();
        let service = PipelinesService::new(backend.clone());
        let owner = owner();

        let first = service.get_or_create_default(&owner).await.unwrap();
        let second = service.get_or_create_default(&owner).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(backend.rows(PIPELINES_TABLE).len(), 1);
        assert_eq!(backend.rows(STAGES_TABLE).len(), DEFAULT_STAGES.len());
        assert_eq!(backend.rows(PROFILES_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn test_profile_failure_does_not_block() {
        let backend = InMemoryBackend::new();
        backend.fail_table(
            PROFILES_TABLE,
            RemoteError::api(500, "XX000", "profiles unavailable"),
        );
        let service = PipelinesService::new(backend.clone());

        let pipeline = service.get_or_create_default(&owner()).await;
        assert!(pipeline.is_ok());
    }
}
