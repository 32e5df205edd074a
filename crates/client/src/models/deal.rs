//! Deals and their insert/update payloads.

use chrono::{DateTime, Utc};
use pipecrm_core::{CompanyId, ContactId, DealId, DealStatus, PipelineId, StageId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Pipeline, Stage};

/// A deal row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    /// Deal value. Stored as `numeric`, sent by the API as a JSON number.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub stage_id: StageId,
    pub pipeline_id: PipelineId,
    #[serde(default)]
    pub company_id: Option<CompanyId>,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    pub owner_id: UserId,
    #[serde(default)]
    pub status: DealStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A deal with its stage and pipeline embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealWithRelations {
    #[serde(flatten)]
    pub deal: Deal,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub pipeline: Option<Pipeline>,
}

/// Insert payload for `deals`.
#[derive(Debug, Clone, Serialize)]
pub struct NewDeal {
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub stage_id: StageId,
    pub pipeline_id: PipelineId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<CompanyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<ContactId>,
    pub owner_id: UserId,
    pub status: DealStatus,
}

/// Partial update for `deals`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DealPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<CompanyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<ContactId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DealStatus>,
}

impl DealPatch {
    /// Move to `stage_id` of `pipeline_id`.
    #[must_use]
    pub fn move_to(pipeline_id: PipelineId, stage_id: StageId) -> Self {
        Self {
            stage_id: Some(stage_id),
            pipeline_id: Some(pipeline_id),
            ..Self::default()
        }
    }
}
