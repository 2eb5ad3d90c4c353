//! SQL counterpart of the in-memory [`ApprovalLedger`]: same transition
//! table, enforced under `SELECT ... FOR UPDATE` so concurrent actors see
//! exactly one winner per item.
//!
//! [`ApprovalLedger`]: crate::model::ApprovalLedger

use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, PoolError};
use serde::Serialize;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::learning_outcomes::insert_outcome;
use crate::db::PgPool;
use crate::engine::Decision;
use crate::model::{
    ActionCandidate, ActionType, ApprovalItem, ApprovalStatus, Channel, ClaimOutcome,
    DecisionType, NewOutcome, UserDecision,
};

#[derive(Debug, thiserror::Error)]
pub enum ApprovalStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map approval row: {0}")]
    Mapping(String),
    #[error("approval item {0} not found")]
    NotFound(i64),
    #[error("approval item already exists for candidate {0}")]
    DuplicateCandidate(String),
}

fn parse_status(value: &str) -> Result<ApprovalStatus, ApprovalStorageError> {
    ApprovalStatus::parse(value)
        .ok_or_else(|| ApprovalStorageError::Mapping(format!("unknown status: {value}")))
}

fn parse_decision_type(value: &str) -> Result<DecisionType, ApprovalStorageError> {
    DecisionType::parse(value)
        .ok_or_else(|| ApprovalStorageError::Mapping(format!("unknown decision_type: {value}")))
}

fn row_to_item(row: &Row) -> Result<ApprovalItem, ApprovalStorageError> {
    Ok(ApprovalItem {
        id: row.try_get("id")?,
        candidate_id: row.try_get("candidate_id")?,
        workspace_id: row.try_get("workspace_id")?,
        action_type: ActionType::parse(row.try_get::<_, String>("action_type")?.as_str())
            .map_err(|err| ApprovalStorageError::Mapping(err.to_string()))?,
        channel: Channel::parse(row.try_get::<_, String>("channel")?.as_str())
            .map_err(|err| ApprovalStorageError::Mapping(err.to_string()))?,
        status: parse_status(row.try_get::<_, String>("status")?.as_str())?,
        decision_type: parse_decision_type(row.try_get::<_, String>("decision_type")?.as_str())?,
        priority: row.try_get("priority")?,
        biased_confidence: row.try_get("biased_confidence")?,
        reasoning: row.try_get("reasoning")?,
        chosen_variant: row.try_get("chosen_variant")?,
        scheduled_step_id: row.try_get("scheduled_step_id")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        override_reason: row.try_get("override_reason")?,
        attempt_count: row.try_get("attempt_count")?,
        last_error: row.try_get("last_error")?,
        executed_by: row.try_get("executed_by")?,
        executed_at: row.try_get("executed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert the candidate row and its approval item in one transaction.
/// A candidate id already present anywhere in the store is a duplicate,
/// regardless of what state its item has reached.
#[instrument(skip(pool, candidate), fields(candidate_id = %candidate.candidate_id))]
pub async fn create_approval(
    pool: &PgPool,
    candidate: &ActionCandidate,
    decision: &Decision,
) -> Result<ApprovalItem, ApprovalStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let inserted = crate::db::candidates::insert_candidate(&tx, candidate).await?;
    if !inserted {
        return Err(ApprovalStorageError::DuplicateCandidate(
            candidate.candidate_id.clone(),
        ));
    }

    let stmt = tx
        .prepare_cached(
            "INSERT INTO sophia.approval_items (
                candidate_id,
                workspace_id,
                action_type,
                channel,
                status,
                decision_type,
                priority,
                biased_confidence,
                reasoning,
                chosen_variant,
                scheduled_step_id
            ) VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10)
            RETURNING *",
        )
        .await?;

    let row = tx
        .query_one(
            &stmt,
            &[
                &candidate.candidate_id,
                &candidate.workspace_id,
                &candidate.action_type.as_str(),
                &candidate.channel.as_str(),
                &decision.decision_type.as_str(),
                &decision.decision_type.priority(),
                &decision.biased_confidence.clamp(0, 100),
                &decision.reasoning,
                &decision.chosen_variant,
                &candidate.scheduled_step_id,
            ],
        )
        .await?;

    let item = row_to_item(&row)?;
    tx.commit().await?;
    Ok(item)
}

#[instrument(skip(pool))]
pub async fn get_item(pool: &PgPool, id: i64) -> Result<Option<ApprovalItem>, ApprovalStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT * FROM sophia.approval_items WHERE id = $1", &[&id])
        .await?;
    row.map(|r| row_to_item(&r)).transpose()
}

async fn lock_item(
    tx: &impl GenericClient,
    id: i64,
) -> Result<ApprovalItem, ApprovalStorageError> {
    let row = tx
        .query_opt(
            "SELECT * FROM sophia.approval_items WHERE id = $1 FOR UPDATE",
            &[&id],
        )
        .await?
        .ok_or(ApprovalStorageError::NotFound(id))?;
    row_to_item(&row)
}

/// Approve a pending item. Approving anything no longer pending is a no-op
/// that reports the current status. Choosing a variant other than the
/// engine's pick is recorded as a `modified` outcome.
#[instrument(skip(pool))]
pub async fn approve_item(
    pool: &PgPool,
    id: i64,
    approver: &str,
    chosen_variant: Option<i32>,
) -> Result<ApprovalStatus, ApprovalStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let item = lock_item(&tx, id).await?;
    if item.status != ApprovalStatus::Pending {
        return Ok(item.status);
    }

    let modified = chosen_variant.is_some() && chosen_variant != item.chosen_variant;
    let now = Utc::now();
    tx.execute(
        "UPDATE sophia.approval_items
         SET status = 'approved',
             approved_by = $2,
             approved_at = $3,
             chosen_variant = COALESCE($4, chosen_variant),
             updated_at = $3
         WHERE id = $1",
        &[&id, &approver, &now, &chosen_variant],
    )
    .await?;

    insert_outcome(
        &tx,
        &item,
        &NewOutcome {
            user_decision: if modified {
                UserDecision::Modified
            } else {
                UserDecision::Approved
            },
            user_feedback: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(ApprovalStatus::Approved)
}

/// Reject a pending item; terminal and idempotent.
#[instrument(skip(pool))]
pub async fn reject_item(pool: &PgPool, id: i64) -> Result<ApprovalStatus, ApprovalStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let item = lock_item(&tx, id).await?;
    if item.status != ApprovalStatus::Pending {
        return Ok(item.status);
    }

    tx.execute(
        "UPDATE sophia.approval_items SET status = 'rejected', updated_at = NOW() WHERE id = $1",
        &[&id],
    )
    .await?;

    insert_outcome(
        &tx,
        &item,
        &NewOutcome {
            user_decision: UserDecision::Rejected,
            user_feedback: None,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(ApprovalStatus::Rejected)
}

/// Override skips the item with a reason; legal from any non-terminal state
/// and a no-op on terminal ones. The reason travels into the learning loop
/// as user feedback.
#[instrument(skip(pool, reason))]
pub async fn override_item(
    pool: &PgPool,
    id: i64,
    reason: &str,
) -> Result<ApprovalStatus, ApprovalStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let item = lock_item(&tx, id).await?;
    if item.status.is_terminal() {
        return Ok(item.status);
    }

    tx.execute(
        "UPDATE sophia.approval_items
         SET status = 'overridden', override_reason = $2, updated_at = NOW()
         WHERE id = $1",
        &[&id, &reason],
    )
    .await?;

    insert_outcome(
        &tx,
        &item,
        &NewOutcome {
            user_decision: UserDecision::Modified,
            user_feedback: Some(reason.to_string()),
        },
    )
    .await?;

    tx.commit().await?;
    Ok(ApprovalStatus::Overridden)
}

/// The atomic conditional transition to `executed`. Exactly one caller wins
/// a contended item; the losers learn where it went. A claim from `pending`
/// is an autonomous decision and writes the `auto_executed` outcome; a claim
/// from `approved` was already recorded at approval time.
#[instrument(skip(pool))]
pub async fn claim_for_execution(
    pool: &PgPool,
    id: i64,
    executed_by: &str,
) -> Result<ClaimOutcome, ApprovalStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let item = lock_item(&tx, id).await?;
    let previous = item.status;
    if !previous.can_transition_to(ApprovalStatus::Executed) {
        return Ok(ClaimOutcome::AlreadyMoved(previous));
    }

    let now = Utc::now();
    let row = tx
        .query_one(
            "UPDATE sophia.approval_items
             SET status = 'executed', executed_by = $2, executed_at = $3, updated_at = $3
             WHERE id = $1
             RETURNING *",
            &[&id, &executed_by, &now],
        )
        .await?;
    let claimed = row_to_item(&row)?;

    if previous == ApprovalStatus::Pending {
        insert_outcome(
            &tx,
            &claimed,
            &NewOutcome {
                user_decision: UserDecision::AutoExecuted,
                user_feedback: None,
            },
        )
        .await?;
    }

    tx.commit().await?;
    Ok(ClaimOutcome::Claimed(Box::new(claimed)))
}

/// Record the effect call's result after a successful claim. A failure never
/// reverts the claim; the error stays on the row for inspection.
#[instrument(skip(pool, error))]
pub async fn record_execution_result(
    pool: &PgPool,
    id: i64,
    error: Option<&str>,
) -> Result<(), ApprovalStorageError> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            "UPDATE sophia.approval_items
             SET attempt_count = attempt_count + 1, last_error = $2, updated_at = NOW()
             WHERE id = $1",
            &[&id, &error],
        )
        .await?;

    if updated == 0 {
        return Err(ApprovalStorageError::NotFound(id));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub workspace_id: Option<String>,
    pub status: Option<ApprovalStatus>,
    pub decision_type: Option<DecisionType>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalListResponse {
    pub items: Vec<ApprovalItem>,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[instrument(skip(pool))]
pub async fn list_items(
    pool: &PgPool,
    filter: &ApprovalFilter,
    pagination: &Pagination,
) -> Result<ApprovalListResponse, ApprovalStorageError> {
    let client = pool.get().await?;

    let fetch_limit = pagination.limit + 1;

    let mut values: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
    let mut query = String::from("SELECT * FROM sophia.approval_items WHERE 1=1");

    if let Some(workspace_id) = &filter.workspace_id {
        query.push_str(&format!(" AND workspace_id = ${}", values.len() + 1));
        values.push(Box::new(workspace_id.clone()));
    }

    if let Some(status) = filter.status {
        query.push_str(&format!(" AND status = ${}", values.len() + 1));
        values.push(Box::new(status.as_str()));
    }

    if let Some(decision_type) = filter.decision_type {
        query.push_str(&format!(" AND decision_type = ${}", values.len() + 1));
        values.push(Box::new(decision_type.as_str()));
    }

    query.push_str(&format!(
        " ORDER BY priority DESC, biased_confidence DESC, created_at, id LIMIT ${} OFFSET ${}",
        values.len() + 1,
        values.len() + 2
    ));

    values.push(Box::new(fetch_limit));
    values.push(Box::new(pagination.offset));

    let params: Vec<&(dyn ToSql + Sync)> = values
        .iter()
        .map(|v| v.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(&query, &params).await?;

    let mut items = rows
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;
    let has_more = (items.len() as i64) > pagination.limit;
    if has_more {
        items.pop();
    }

    Ok(ApprovalListResponse {
        items,
        limit: pagination.limit,
        offset: pagination.offset,
        has_more,
    })
}

/// Items the scheduler may claim for a workspace, in the batch order every
/// run uses: priority, then confidence, then age, then id. Any pending item
/// at or above the effective threshold qualifies, whatever band the engine
/// put it in; approved items are eligible regardless of threshold.
#[instrument(skip(pool))]
pub async fn eligible_for_auto_execute(
    pool: &PgPool,
    workspace_id: &str,
    threshold: i32,
    include_approved: bool,
    limit: i64,
) -> Result<Vec<ApprovalItem>, ApprovalStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM sophia.approval_items
             WHERE workspace_id = $1
               AND (
                 (status = 'pending' AND biased_confidence >= $2)
                 OR ($3 AND status = 'approved')
               )
             ORDER BY priority DESC, biased_confidence DESC, created_at, id
             LIMIT $4",
            &[&workspace_id, &threshold, &include_approved, &limit],
        )
        .await?;

    rows.iter().map(row_to_item).collect()
}

/// Workspaces that currently have at least one claimable item.
#[instrument(skip(pool))]
pub async fn workspaces_with_claimable_items(
    pool: &PgPool,
) -> Result<Vec<String>, ApprovalStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT DISTINCT workspace_id FROM sophia.approval_items
             WHERE status IN ('pending', 'approved')
             ORDER BY workspace_id",
            &[],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get("workspace_id")).collect())
}

/// Pending-backlog shape for one workspace, feeding the alert conditions.
#[instrument(skip(pool))]
pub async fn pending_backlog(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<(i64, Option<DateTime<Utc>>), ApprovalStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT COUNT(*) AS pending_count, MIN(created_at) AS oldest_at
             FROM sophia.approval_items
             WHERE workspace_id = $1 AND status = 'pending'",
            &[&workspace_id],
        )
        .await?;
    Ok((row.try_get("pending_count")?, row.try_get("oldest_at")?))
}

/// Execution attempts and failures over the trailing window, for the
/// failure-rate alert.
#[instrument(skip(pool))]
pub async fn execution_stats(
    pool: &PgPool,
    workspace_id: &str,
    since: DateTime<Utc>,
) -> Result<(i64, i64), ApprovalStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT
                COUNT(*) FILTER (WHERE attempt_count > 0) AS attempts,
                COUNT(*) FILTER (WHERE attempt_count > 0 AND last_error IS NOT NULL) AS failures
             FROM sophia.approval_items
             WHERE workspace_id = $1 AND executed_at >= $2",
            &[&workspace_id, &since],
        )
        .await?;
    Ok((row.try_get("attempts")?, row.try_get("failures")?))
}
