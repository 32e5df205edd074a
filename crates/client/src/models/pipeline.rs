//! Pipelines and their stages.

use chrono::{DateTime, Utc};
use pipecrm_core::{PipelineId, StageId, UserId};
use serde::{Deserialize, Serialize};

/// A sales pipeline owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A column of the pipeline board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    /// 1-based display order within the pipeline.
    pub position: i32,
    pub pipeline_id: PipelineId,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `pipelines`.
#[derive(Debug, Clone, Serialize)]
pub struct NewPipeline {
    pub name: String,
    pub owner_id: UserId,
}

/// Insert payload for `pipeline_stages`.
#[derive(Debug, Clone, Serialize)]
pub struct NewStage {
    pub name: String,
    pub position: i32,
    pub pipeline_id: PipelineId,
}

/// Upsert payload for `profiles`.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRow {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_admin: bool,
}
