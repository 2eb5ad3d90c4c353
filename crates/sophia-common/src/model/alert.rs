use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(AlertSeverity::Critical),
            "warning" => Some(AlertSeverity::Warning),
            "info" => Some(AlertSeverity::Info),
            _ => None,
        }
    }
}

/// A dismissible alert. While open, at most one alert per
/// (workspace, dedupe_key) exists; the store enforces this with a partial
/// unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub workspace_id: String,
    pub severity: AlertSeverity,
    pub dedupe_key: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub dismissed_by: Option<String>,
}

/// A condition evaluation result before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub severity: AlertSeverity,
    pub dedupe_key: &'static str,
    pub message: String,
}
