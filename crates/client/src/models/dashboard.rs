//! Dashboard metrics, computed client-side from full row sets.

use pipecrm_core::{ActivityType, StageId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Every panel of the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub deals: DealMetrics,
    pub contacts: ContactMetrics,
    pub companies: CompanyMetrics,
    pub activities: ActivityMetrics,
}

/// Deal counts and values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealMetrics {
    pub total: usize,
    pub open: usize,
    pub won: usize,
    pub lost: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_value: Decimal,
    /// `0` when there are no deals.
    #[serde(with = "rust_decimal::serde::float")]
    pub average_value: Decimal,
    /// Won deals as a percentage of all deals; `0` when there are none.
    pub conversion_rate: f64,
    pub by_stage: Vec<StageMetric>,
}

/// Deals sitting in one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetric {
    pub stage_id: StageId,
    pub stage_name: String,
    pub count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMetrics {
    pub total: usize,
    /// Created in the last 30 days.
    pub recently_added: usize,
    pub with_email: usize,
    pub with_phone: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyMetrics {
    pub total: usize,
    /// Created in the last 30 days.
    pub recently_added: usize,
    pub by_segment: Vec<SegmentMetric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMetric {
    pub segment: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMetrics {
    pub total: usize,
    /// Created since local midnight.
    pub today: usize,
    /// Created since Sunday 00:00 local time.
    pub this_week: usize,
    pub by_type: Vec<ActivityTypeMetric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityTypeMetric {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub count: usize,
}
