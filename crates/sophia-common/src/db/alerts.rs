use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::alerts::WorkspaceSignals;
use crate::db::approval_items::{execution_stats, pending_backlog, ApprovalStorageError};
use crate::db::candidates::{last_candidate_at, CandidateStorageError};
use crate::db::PgPool;
use crate::model::{Alert, AlertDraft, AlertSeverity};

#[derive(Debug, thiserror::Error)]
pub enum AlertStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map alert row: {0}")]
    Mapping(String),
    #[error(transparent)]
    Approvals(#[from] ApprovalStorageError),
    #[error(transparent)]
    Candidates(#[from] CandidateStorageError),
}

fn row_to_alert(row: &Row) -> Result<Alert, AlertStorageError> {
    let severity_raw: String = row.try_get("severity")?;
    Ok(Alert {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        severity: AlertSeverity::parse(&severity_raw)
            .ok_or_else(|| AlertStorageError::Mapping(format!("unknown severity: {severity_raw}")))?,
        dedupe_key: row.try_get("dedupe_key")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        dismissed_at: row.try_get("dismissed_at")?,
        dismissed_by: row.try_get("dismissed_by")?,
    })
}

/// Persist evaluated drafts. The partial unique index swallows any draft
/// whose condition already has an open alert, so re-evaluating a standing
/// condition never stacks duplicates. Returns how many rows were new.
#[instrument(skip(pool, drafts), fields(count = drafts.len()))]
pub async fn record_alerts(
    pool: &PgPool,
    workspace_id: &str,
    drafts: &[AlertDraft],
) -> Result<u64, AlertStorageError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "INSERT INTO sophia.alerts (workspace_id, severity, dedupe_key, message)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (workspace_id, dedupe_key) WHERE dismissed_at IS NULL
             DO NOTHING",
        )
        .await?;

    let mut inserted = 0;
    for draft in drafts {
        inserted += client
            .execute(
                &stmt,
                &[
                    &workspace_id,
                    &draft.severity.as_str(),
                    &draft.dedupe_key,
                    &draft.message,
                ],
            )
            .await?;
    }
    Ok(inserted)
}

#[instrument(skip(pool))]
pub async fn list_open_alerts(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<Vec<Alert>, AlertStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM sophia.alerts
             WHERE workspace_id = $1 AND dismissed_at IS NULL
             ORDER BY created_at DESC, id DESC",
            &[&workspace_id],
        )
        .await?;
    rows.iter().map(row_to_alert).collect()
}

/// Dismissing an already-dismissed alert is a no-op; the first dismissal's
/// timestamp and actor are kept.
#[instrument(skip(pool))]
pub async fn dismiss_alert(
    pool: &PgPool,
    id: i64,
    dismissed_by: &str,
) -> Result<bool, AlertStorageError> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            "UPDATE sophia.alerts
             SET dismissed_at = NOW(), dismissed_by = $2
             WHERE id = $1 AND dismissed_at IS NULL",
            &[&id, &dismissed_by],
        )
        .await?;
    Ok(updated == 1)
}

/// Collect the raw signals the alert conditions are evaluated against.
#[instrument(skip(pool))]
pub async fn gather_signals(
    pool: &PgPool,
    workspace_id: &str,
    now: DateTime<Utc>,
) -> Result<WorkspaceSignals, AlertStorageError> {
    let (attempts_24h, failures_24h) =
        execution_stats(pool, workspace_id, now - Duration::hours(24)).await?;
    let (pending_count, oldest_pending_at) = pending_backlog(pool, workspace_id).await?;
    let last_candidate = last_candidate_at(pool, workspace_id).await?;

    Ok(WorkspaceSignals {
        attempts_24h,
        failures_24h,
        last_candidate_at: last_candidate,
        pending_count,
        oldest_pending_at,
    })
}
