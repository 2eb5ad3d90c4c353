use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    EnableAutoExecute,
    LowerThreshold,
    RaiseThreshold,
    ChannelSwitch,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationKind::EnableAutoExecute => "enable_auto_execute",
            RecommendationKind::LowerThreshold => "lower_threshold",
            RecommendationKind::RaiseThreshold => "raise_threshold",
            RecommendationKind::ChannelSwitch => "channel_switch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enable_auto_execute" => Some(RecommendationKind::EnableAutoExecute),
            "lower_threshold" => Some(RecommendationKind::LowerThreshold),
            "raise_threshold" => Some(RecommendationKind::RaiseThreshold),
            "channel_switch" => Some(RecommendationKind::ChannelSwitch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Executed,
    Dismissed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Executed => "executed",
            RecommendationStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RecommendationStatus::Pending),
            "executed" => Some(RecommendationStatus::Executed),
            "dismissed" => Some(RecommendationStatus::Dismissed),
            _ => None,
        }
    }
}

/// An actionable suggestion derived from aggregate signals. Executing or
/// dismissing is terminal; both are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub workspace_id: String,
    pub kind: RecommendationKind,
    pub priority: i32,
    pub confidence: i32,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub action_label: String,
    pub potential_impact: String,
    pub status: RecommendationStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationDraft {
    pub kind: RecommendationKind,
    pub priority: i32,
    pub confidence: i32,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub action_label: String,
    pub potential_impact: String,
}
