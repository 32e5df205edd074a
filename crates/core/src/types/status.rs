//! Status enums for CRM records.

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a status from its database value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("invalid deal status: {0}")]
    DealStatus(String),
    #[error("invalid activity type: {0}")]
    ActivityType(String),
}

/// Lifecycle status of a deal.
///
/// Maps to the `deal_status` enum of the hosted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    #[default]
    Open,
    Won,
    Lost,
    Archived,
}

impl DealStatus {
    /// All statuses, in board display order.
    pub const ALL: [Self; 4] = [Self::Open, Self::Won, Self::Lost, Self::Archived];

    /// Database value for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DealStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "archived" => Ok(Self::Archived),
            _ => Err(StatusError::DealStatus(s.to_string())),
        }
    }
}

/// Kind of activity logged against a deal.
///
/// Maps to the `activity_type` enum of the hosted database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Note,
    Call,
    Email,
    Meeting,
    Task,
    Other,
}

impl ActivityType {
    /// Database value for this activity type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Call => "call",
            Self::Email => "email",
            Self::Meeting => "meeting",
            Self::Task => "task",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(Self::Note),
            "call" => Ok(Self::Call),
            "email" => Ok(Self::Email),
            "meeting" => Ok(Self::Meeting),
            "task" => Ok(Self::Task),
            "other" => Ok(Self::Other),
            _ => Err(StatusError::ActivityType(s.to_string())),
        }
    }
}
