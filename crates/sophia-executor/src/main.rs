use std::collections::HashMap;

use chrono::{DateTime, Utc};
use clap::Parser;
use dotenvy::dotenv;
use sophia_common::alerts::{AlertConfig, evaluate_conditions};
use sophia_common::db::{
    AlertStorageError, DbPoolError, MigrationError, OutcomeStorageError, PgPool,
    RecommendationStorageError, SettingsStorageError, create_pool_from_url, effective_settings,
    gather_signals, group_stats, list_settings, record_alerts, record_recommendations,
    run_migrations,
};
use sophia_common::dispatch::{DispatchConfig, EffectError, WebhookDispatcher};
use sophia_common::executor::{AutoExecuteOptions, ExecutorError, run_auto_execute};
use sophia_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use sophia_common::model::AutoExecuteSettings;
use sophia_common::recommend::{RecommendConfig, derive_recommendations};
use thiserror::Error;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Pool(#[from] DbPoolError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("failed to build webhook dispatcher: {0}")]
    Dispatcher(#[from] EffectError),
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "sophia-executor",
    about = "Runs scheduled auto-execution batches and workspace health checks"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "SOPHIA_DATABASE_URL")]
    database_url: String,

    /// Seconds between scheduler ticks
    #[arg(long, env = "SOPHIA_EXECUTOR_POLL_INTERVAL", default_value_t = 60)]
    poll_interval: u64,

    /// Cap on items claimed per workspace per batch; 0 means the default
    #[arg(long, env = "SOPHIA_EXECUTOR_BATCH_LIMIT", default_value_t = 0)]
    batch_limit: i64,

    /// Run a single cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

/// Tracks when each workspace last ran, so `hourly` and `daily` schedules
/// fire on their own cadence regardless of the tick interval.
struct ScheduleTracker {
    last_run: HashMap<String, DateTime<Utc>>,
}

impl ScheduleTracker {
    fn new() -> Self {
        Self {
            last_run: HashMap::new(),
        }
    }

    fn is_due(&self, settings: &AutoExecuteSettings, now: DateTime<Utc>) -> bool {
        let Some(period) = settings.schedule_interval.period() else {
            return false;
        };
        match self.last_run.get(&settings.workspace_id) {
            Some(last) => now - *last >= period,
            None => true,
        }
    }

    fn mark_ran(&mut self, workspace_id: &str, now: DateTime<Utc>) {
        self.last_run.insert(workspace_id.to_string(), now);
    }
}

struct Daemon {
    pool: PgPool,
    dispatcher: WebhookDispatcher,
    alert_config: AlertConfig,
    recommend_config: RecommendConfig,
    batch_limit: i64,
    tracker: ScheduleTracker,
}

impl Daemon {
    /// One scheduler tick: run due workspaces, then refresh alerts and
    /// recommendations for every configured workspace. Failures in one
    /// workspace are logged and never stop the others.
    async fn cycle(&mut self) {
        let now = Utc::now();

        let all_settings = match list_settings(&self.pool).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "failed to load workspace settings; skipping cycle");
                return;
            }
        };

        let due: Vec<String> = all_settings
            .iter()
            .filter(|s| s.enabled && self.tracker.is_due(s, now))
            .map(|s| s.workspace_id.clone())
            .collect();

        if due.is_empty() {
            debug!("no workspaces due this tick");
        } else {
            match self.run_batch(&due).await {
                Ok((executed, failed)) => {
                    info!(
                        workspaces = due.len(),
                        executed, failed, "auto-execute batch finished"
                    );
                    for workspace_id in &due {
                        self.tracker.mark_ran(workspace_id, now);
                    }
                }
                Err(err) => warn!(error = %err, "auto-execute batch failed"),
            }
        }

        for settings in &all_settings {
            if let Err(err) = self.refresh_health(&settings.workspace_id, now).await {
                warn!(
                    workspace_id = %settings.workspace_id,
                    error = %err,
                    "workspace health refresh failed"
                );
            }
        }
    }

    async fn run_batch(&self, workspaces: &[String]) -> Result<(usize, usize), ExecutorError> {
        let options = AutoExecuteOptions {
            workspaces: Some(workspaces.to_vec()),
            threshold_override: None,
            include_approved: true,
            batch_limit: self.batch_limit,
        };

        let report = run_auto_execute(&self.pool, &self.dispatcher, &options).await?;
        Ok((report.total_executed(), report.total_failed()))
    }

    async fn refresh_health(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HealthError> {
        let signals = gather_signals(&self.pool, workspace_id, now).await?;
        let drafts = evaluate_conditions(&signals, now, &self.alert_config);
        if !drafts.is_empty() {
            let raised = record_alerts(&self.pool, workspace_id, &drafts).await?;
            if raised > 0 {
                info!(workspace_id, raised, "raised workspace alerts");
            }
        }

        let settings = effective_settings(&self.pool, workspace_id).await?;
        let groups = group_stats(&self.pool, Some(workspace_id)).await?;
        let recommendations = derive_recommendations(&settings, &groups, &self.recommend_config);
        if !recommendations.is_empty() {
            record_recommendations(&self.pool, workspace_id, &recommendations).await?;
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
enum HealthError {
    #[error(transparent)]
    Alerts(#[from] AlertStorageError),
    #[error(transparent)]
    Settings(#[from] SettingsStorageError),
    #[error(transparent)]
    Outcomes(#[from] OutcomeStorageError),
    #[error(transparent)]
    Recommendations(#[from] RecommendationStorageError),
}

async fn run() -> Result<(), DaemonError> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    sophia_metrics::init_metrics("SOPHIA_METRICS_PORT", 9103);

    let pool = create_pool_from_url(&cli.database_url)?;
    run_migrations(&pool).await?;

    let dispatcher = WebhookDispatcher::new(DispatchConfig::from_env())?;

    let mut daemon = Daemon {
        pool,
        dispatcher,
        alert_config: AlertConfig::from_env(),
        recommend_config: RecommendConfig::from_env(),
        batch_limit: cli.batch_limit,
        tracker: ScheduleTracker::new(),
    };

    if cli.once {
        daemon.cycle().await;
        return Ok(());
    }

    info!(poll_interval = cli.poll_interval, "starting sophia-executor");
    let mut ticker = interval(Duration::from_secs(cli.poll_interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => daemon.cycle().await,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received; stopping scheduler");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("sophia-executor failed: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sophia_common::model::ScheduleInterval;

    fn settings(interval: ScheduleInterval) -> AutoExecuteSettings {
        AutoExecuteSettings {
            workspace_id: "ws-1".into(),
            enabled: true,
            confidence_threshold: 85,
            schedule_interval: interval,
        }
    }

    #[test]
    fn off_schedule_is_never_due() {
        let tracker = ScheduleTracker::new();
        assert!(!tracker.is_due(&settings(ScheduleInterval::Off), Utc::now()));
    }

    #[test]
    fn first_run_is_always_due() {
        let tracker = ScheduleTracker::new();
        assert!(tracker.is_due(&settings(ScheduleInterval::Hourly), Utc::now()));
    }

    #[test]
    fn hourly_schedule_waits_out_its_period() {
        let mut tracker = ScheduleTracker::new();
        let now = Utc::now();
        tracker.mark_ran("ws-1", now);

        let soon = now + chrono::Duration::minutes(30);
        assert!(!tracker.is_due(&settings(ScheduleInterval::Hourly), soon));

        let later = now + chrono::Duration::minutes(61);
        assert!(tracker.is_due(&settings(ScheduleInterval::Hourly), later));
    }
}
