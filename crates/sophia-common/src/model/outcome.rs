use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::approval::DecisionType;
use crate::model::candidate::{ActionType, Channel};

/// What actually happened to a proposal, as opposed to what the engine
/// recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    Approved,
    Rejected,
    Modified,
    AutoExecuted,
}

impl UserDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserDecision::Approved => "approved",
            UserDecision::Rejected => "rejected",
            UserDecision::Modified => "modified",
            UserDecision::AutoExecuted => "auto_executed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approved" => Some(UserDecision::Approved),
            "rejected" => Some(UserDecision::Rejected),
            "modified" => Some(UserDecision::Modified),
            "auto_executed" => Some(UserDecision::AutoExecuted),
            _ => None,
        }
    }

    /// Signals agreement with the proposal, for approval-rate math.
    pub fn counts_as_approval(&self) -> bool {
        matches!(self, UserDecision::Approved | UserDecision::AutoExecuted)
    }
}

/// Append-only audit record written on every terminal transition. Only
/// `applied_to_future` is ever mutated, once the bias derivation has folded
/// the row in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub id: i64,
    pub approval_item_id: i64,
    pub workspace_id: String,
    pub action_type: ActionType,
    pub channel: Channel,
    pub original_decision: DecisionType,
    pub user_decision: UserDecision,
    pub sophia_confidence: i32,
    pub sophia_reasoning: String,
    pub user_feedback: Option<String>,
    pub applied_to_future: bool,
    pub created_at: DateTime<Utc>,
}

/// The caller-supplied half of an outcome; the store fills in the item's
/// context at write time.
#[derive(Debug, Clone)]
pub struct NewOutcome {
    pub user_decision: UserDecision,
    pub user_feedback: Option<String>,
}
