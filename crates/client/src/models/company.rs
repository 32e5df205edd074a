//! Companies.

use chrono::{DateTime, Utc};
use pipecrm_core::CompanyId;
use serde::{Deserialize, Serialize};

/// An organisation deals and contacts belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    /// Market segment; dashboards bucket companies without one as "Outros".
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `companies`.
#[derive(Debug, Clone, Serialize)]
pub struct NewCompany {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Partial update for `companies`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompanyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}
