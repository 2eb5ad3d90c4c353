use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_THRESHOLD: i32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleInterval {
    Off,
    Hourly,
    Daily,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::Off => "off",
            ScheduleInterval::Hourly => "hourly",
            ScheduleInterval::Daily => "daily",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ScheduleInterval::Off),
            "hourly" => Some(ScheduleInterval::Hourly),
            "daily" => Some(ScheduleInterval::Daily),
            _ => None,
        }
    }

    pub fn period(&self) -> Option<chrono::Duration> {
        match self {
            ScheduleInterval::Off => None,
            ScheduleInterval::Hourly => Some(chrono::Duration::hours(1)),
            ScheduleInterval::Daily => Some(chrono::Duration::days(1)),
        }
    }
}

/// Per-workspace auto-execution policy, one row per workspace. A workspace
/// without a row gets the safe defaults: disabled, threshold 80.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoExecuteSettings {
    pub workspace_id: String,
    pub enabled: bool,
    pub confidence_threshold: i32,
    pub schedule_interval: ScheduleInterval,
}

impl AutoExecuteSettings {
    pub fn defaults(workspace_id: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            enabled: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            schedule_interval: ScheduleInterval::Off,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workspace_id.trim().is_empty() {
            return Err("workspace id is empty".into());
        }
        if !(0..=100).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence threshold {} is outside 0..=100",
                self.confidence_threshold
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_disabled_at_eighty() {
        let settings = AutoExecuteSettings::defaults("ws-1");
        assert!(!settings.enabled);
        assert_eq!(settings.confidence_threshold, 80);
        assert_eq!(settings.schedule_interval, ScheduleInterval::Off);
    }

    #[test]
    fn threshold_is_validated() {
        let mut settings = AutoExecuteSettings::defaults("ws-1");
        settings.confidence_threshold = 101;
        assert!(settings.validate().is_err());
        settings.confidence_threshold = 0;
        assert!(settings.validate().is_ok());
    }
}
