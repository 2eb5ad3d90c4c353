//! Alert condition evaluation. Pure rules over aggregate workspace
//! signals; persistence and open-alert dedupe live in `db::alerts`.

use chrono::{DateTime, Duration, Utc};

use crate::model::{AlertDraft, AlertSeverity};

pub const KEY_EXECUTION_FAILURE_RATE: &str = "execution_failure_rate";
pub const KEY_STALE_INTAKE: &str = "stale_intake";
pub const KEY_PENDING_BACKLOG: &str = "pending_backlog";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertConfig {
    /// Failure share of execution attempts (last 24h) that trips critical.
    pub failure_rate_threshold: f64,
    /// Attempts needed before the failure rate is meaningful.
    pub min_attempts: i64,
    /// Hours without a new candidate before intake counts as stale.
    pub stale_intake_hours: i64,
    /// Open pending items that trip the backlog warning.
    pub backlog_size: i64,
    /// Or a single pending item older than this many hours.
    pub backlog_age_hours: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.2,
            min_attempts: 5,
            stale_intake_hours: 24,
            backlog_size: 25,
            backlog_age_hours: 48,
        }
    }
}

impl AlertConfig {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            failure_rate_threshold: parse(
                "SOPHIA_ALERT_FAILURE_RATE",
                defaults.failure_rate_threshold,
            ),
            min_attempts: parse("SOPHIA_ALERT_MIN_ATTEMPTS", defaults.min_attempts),
            stale_intake_hours: parse("SOPHIA_ALERT_STALE_HOURS", defaults.stale_intake_hours),
            backlog_size: parse("SOPHIA_ALERT_BACKLOG_SIZE", defaults.backlog_size),
            backlog_age_hours: parse("SOPHIA_ALERT_BACKLOG_AGE_HOURS", defaults.backlog_age_hours),
        }
    }
}

/// Aggregate signals for one workspace, as read back from the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceSignals {
    pub attempts_24h: i64,
    pub failures_24h: i64,
    pub last_candidate_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

/// Evaluate every monitored condition. Calling this twice with the same
/// signals yields the same drafts; the store's dedupe keeps repeated calls
/// from piling up open alerts.
pub fn evaluate_conditions(
    signals: &WorkspaceSignals,
    now: DateTime<Utc>,
    config: &AlertConfig,
) -> Vec<AlertDraft> {
    let mut drafts = Vec::new();

    if signals.attempts_24h >= config.min_attempts {
        let rate = signals.failures_24h as f64 / signals.attempts_24h as f64;
        if rate > config.failure_rate_threshold {
            drafts.push(AlertDraft {
                severity: AlertSeverity::Critical,
                dedupe_key: KEY_EXECUTION_FAILURE_RATE,
                message: format!(
                    "{} of {} executions failed in the last 24h ({:.0}%)",
                    signals.failures_24h,
                    signals.attempts_24h,
                    rate * 100.0
                ),
            });
        }
    }

    match signals.last_candidate_at {
        Some(last) if now - last > Duration::hours(config.stale_intake_hours) => {
            drafts.push(AlertDraft {
                severity: AlertSeverity::Warning,
                dedupe_key: KEY_STALE_INTAKE,
                message: format!(
                    "no new action candidates for {}h; upstream producers may be stalled",
                    (now - last).num_hours()
                ),
            });
        }
        _ => {}
    }

    let backlog_oversized = signals.pending_count >= config.backlog_size;
    let backlog_stale = signals
        .oldest_pending_at
        .map(|oldest| now - oldest > Duration::hours(config.backlog_age_hours))
        .unwrap_or(false);
    if backlog_oversized || backlog_stale {
        drafts.push(AlertDraft {
            severity: AlertSeverity::Warning,
            dedupe_key: KEY_PENDING_BACKLOG,
            message: format!(
                "{} approval items waiting on review",
                signals.pending_count
            ),
        });
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> WorkspaceSignals {
        WorkspaceSignals {
            attempts_24h: 20,
            failures_24h: 1,
            last_candidate_at: Some(Utc::now() - Duration::hours(1)),
            pending_count: 3,
            oldest_pending_at: Some(Utc::now() - Duration::hours(2)),
        }
    }

    #[test]
    fn healthy_workspace_raises_nothing() {
        let drafts = evaluate_conditions(&healthy(), Utc::now(), &AlertConfig::default());
        assert!(drafts.is_empty());
    }

    #[test]
    fn elevated_failure_rate_is_critical() {
        let mut signals = healthy();
        signals.failures_24h = 8;

        let drafts = evaluate_conditions(&signals, Utc::now(), &AlertConfig::default());

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].severity, AlertSeverity::Critical);
        assert_eq!(drafts[0].dedupe_key, KEY_EXECUTION_FAILURE_RATE);
    }

    #[test]
    fn failure_rate_needs_a_minimum_sample() {
        let mut signals = healthy();
        signals.attempts_24h = 2;
        signals.failures_24h = 2;

        let drafts = evaluate_conditions(&signals, Utc::now(), &AlertConfig::default());
        assert!(drafts.is_empty());
    }

    #[test]
    fn silent_intake_goes_stale() {
        let mut signals = healthy();
        signals.last_candidate_at = Some(Utc::now() - Duration::hours(30));

        let drafts = evaluate_conditions(&signals, Utc::now(), &AlertConfig::default());

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].dedupe_key, KEY_STALE_INTAKE);
    }

    #[test]
    fn backlog_trips_on_size_or_age() {
        let mut by_size = healthy();
        by_size.pending_count = 30;
        let drafts = evaluate_conditions(&by_size, Utc::now(), &AlertConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].dedupe_key, KEY_PENDING_BACKLOG);

        let mut by_age = healthy();
        by_age.oldest_pending_at = Some(Utc::now() - Duration::hours(72));
        let drafts = evaluate_conditions(&by_age, Utc::now(), &AlertConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].dedupe_key, KEY_PENDING_BACKLOG);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let signals = WorkspaceSignals {
            failures_24h: 10,
            attempts_24h: 20,
            ..healthy()
        };
        let now = Utc::now();
        let first = evaluate_conditions(&signals, now, &AlertConfig::default());
        let second = evaluate_conditions(&signals, now, &AlertConfig::default());
        assert_eq!(first, second);
    }
}
