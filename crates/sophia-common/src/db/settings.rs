use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::PgPool;
use crate::model::{AutoExecuteSettings, ScheduleInterval};

#[derive(Debug, thiserror::Error)]
pub enum SettingsStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map settings row: {0}")]
    Mapping(String),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

fn row_to_settings(row: &Row) -> Result<AutoExecuteSettings, SettingsStorageError> {
    let interval_raw: String = row.try_get("schedule_interval")?;
    Ok(AutoExecuteSettings {
        workspace_id: row.try_get("workspace_id")?,
        enabled: row.try_get("enabled")?,
        confidence_threshold: row.try_get("confidence_threshold")?,
        schedule_interval: ScheduleInterval::parse(&interval_raw).ok_or_else(|| {
            SettingsStorageError::Mapping(format!("unknown schedule_interval: {interval_raw}"))
        })?,
    })
}

/// The stored row, if the workspace has ever been configured.
#[instrument(skip(pool))]
pub async fn get_settings(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<Option<AutoExecuteSettings>, SettingsStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT workspace_id, enabled, confidence_threshold, schedule_interval
             FROM sophia.auto_execute_settings WHERE workspace_id = $1",
            &[&workspace_id],
        )
        .await?;
    row.map(|r| row_to_settings(&r)).transpose()
}

/// Settings with the unconfigured-workspace defaults applied: disabled,
/// threshold 80, manual runs only.
#[instrument(skip(pool))]
pub async fn effective_settings(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<AutoExecuteSettings, SettingsStorageError> {
    Ok(get_settings(pool, workspace_id)
        .await?
        .unwrap_or_else(|| AutoExecuteSettings::defaults(workspace_id)))
}

#[instrument(skip(pool, settings), fields(workspace_id = %settings.workspace_id))]
pub async fn upsert_settings(
    pool: &PgPool,
    settings: &AutoExecuteSettings,
) -> Result<(), SettingsStorageError> {
    settings
        .validate()
        .map_err(SettingsStorageError::Invalid)?;

    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO sophia.auto_execute_settings (
                workspace_id, enabled, confidence_threshold, schedule_interval, updated_at
            ) VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (workspace_id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                confidence_threshold = EXCLUDED.confidence_threshold,
                schedule_interval = EXCLUDED.schedule_interval,
                updated_at = NOW()",
            &[
                &settings.workspace_id,
                &settings.enabled,
                &settings.confidence_threshold,
                &settings.schedule_interval.as_str(),
            ],
        )
        .await?;
    Ok(())
}

/// All workspaces with a stored policy, for the scheduler's snapshot.
#[instrument(skip(pool))]
pub async fn list_settings(pool: &PgPool) -> Result<Vec<AutoExecuteSettings>, SettingsStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT workspace_id, enabled, confidence_threshold, schedule_interval
             FROM sophia.auto_execute_settings ORDER BY workspace_id",
            &[],
        )
        .await?;
    rows.iter().map(row_to_settings).collect()
}
