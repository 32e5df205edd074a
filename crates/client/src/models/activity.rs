//! Activities logged against deals (table `deal_activities`).

use chrono::{DateTime, Utc};
use pipecrm_core::{ActivityId, ActivityType, DealId, UserId};
use serde::{Deserialize, Serialize};

/// A note, call, email, meeting or task on a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub deal_id: DealId,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Title of the deal an activity belongs to, as embedded by `deals(title)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealTitle {
    pub title: String,
}

/// An activity with its deal's title, for activity feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWithDeal {
    #[serde(flatten)]
    pub activity: Activity,
    #[serde(default)]
    pub deals: Option<DealTitle>,
}

/// Insert payload for `deal_activities`.
#[derive(Debug, Clone, Serialize)]
pub struct NewActivity {
    pub deal_id: DealId,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
}

/// Partial update for `deal_activities`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActivityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_with_deal_title() {
        let row: ActivityWithDeal = serde_json::from_value(serde_json::json!({
            "id": "9a8f1f4e-2c7b-4a53-8f7e-0d1c2b3a4f01",
            "deal_id": "9a8f1f4e-2c7b-4a53-8f7e-0d1c2b3a4f02",
            "type": "call",
            "content": "Follow-up call",
            "created_at": "2026-02-01T09:30:00Z",
            "deals": { "title": "Acme renewal" }
        }))
        .unwrap();
        assert_eq!(row.activity.kind, ActivityType::Call);
        assert_eq!(row.deals.unwrap().title, "Acme renewal");
        assert!(row.activity.owner_id.is_none());
    }
}
