use deadpool_postgres::{GenericClient, PoolError};
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::PgPool;
use crate::learning::GroupStats;
use crate::model::{
    ActionType, ApprovalItem, Channel, DecisionType, LearningOutcome, NewOutcome, UserDecision,
};

#[derive(Debug, thiserror::Error)]
pub enum OutcomeStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map outcome row: {0}")]
    Mapping(String),
}

/// Append one outcome row inside the caller's transaction, so the status
/// transition and its audit record commit or roll back together.
pub(crate) async fn insert_outcome(
    client: &impl GenericClient,
    item: &ApprovalItem,
    outcome: &NewOutcome,
) -> Result<i64, PgError> {
    let stmt = client
        .prepare_cached(
            "INSERT INTO sophia.learning_outcomes (
                approval_item_id,
                workspace_id,
                action_type,
                channel,
                original_decision,
                user_decision,
                sophia_confidence,
                sophia_reasoning,
                user_feedback
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id",
        )
        .await?;

    let row = client
        .query_one(
            &stmt,
            &[
                &item.id,
                &item.workspace_id,
                &item.action_type.as_str(),
                &item.channel.as_str(),
                &item.decision_type.as_str(),
                &outcome.user_decision.as_str(),
                &item.biased_confidence,
                &item.reasoning,
                &outcome.user_feedback,
            ],
        )
        .await?;

    Ok(row.get("id"))
}

fn row_to_outcome(row: &Row) -> Result<LearningOutcome, OutcomeStorageError> {
    Ok(LearningOutcome {
        id: row.try_get("id")?,
        approval_item_id: row.try_get("approval_item_id")?,
        workspace_id: row.try_get("workspace_id")?,
        action_type: ActionType::parse(row.try_get::<_, String>("action_type")?.as_str())
            .map_err(|err| OutcomeStorageError::Mapping(err.to_string()))?,
        channel: Channel::parse(row.try_get::<_, String>("channel")?.as_str())
            .map_err(|err| OutcomeStorageError::Mapping(err.to_string()))?,
        original_decision: DecisionType::parse(
            row.try_get::<_, String>("original_decision")?.as_str(),
        )
        .ok_or_else(|| OutcomeStorageError::Mapping("unknown original_decision".into()))?,
        user_decision: UserDecision::parse(row.try_get::<_, String>("user_decision")?.as_str())
            .ok_or_else(|| OutcomeStorageError::Mapping("unknown user_decision".into()))?,
        sophia_confidence: row.try_get("sophia_confidence")?,
        sophia_reasoning: row.try_get("sophia_reasoning")?,
        user_feedback: row.try_get("user_feedback")?,
        applied_to_future: row.try_get("applied_to_future")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Per-(workspace, action, channel) decision counts, the input to bias
/// derivation. `approved` and `auto_executed` count as agreement.
#[instrument(skip(pool))]
pub async fn group_stats(
    pool: &PgPool,
    workspace_id: Option<&str>,
) -> Result<Vec<GroupStats>, OutcomeStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT workspace_id, action_type, channel,
                    COUNT(*) AS total,
                    COUNT(*) FILTER (
                        WHERE user_decision IN ('approved', 'auto_executed')
                    ) AS approvals
             FROM sophia.learning_outcomes
             WHERE ($1::TEXT IS NULL OR workspace_id = $1)
             GROUP BY workspace_id, action_type, channel",
            &[&workspace_id],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(GroupStats {
                workspace_id: row.try_get("workspace_id")?,
                action_type: ActionType::parse(row.try_get::<_, String>("action_type")?.as_str())
                    .map_err(|err| OutcomeStorageError::Mapping(err.to_string()))?,
                channel: Channel::parse(row.try_get::<_, String>("channel")?.as_str())
                    .map_err(|err| OutcomeStorageError::Mapping(err.to_string()))?,
                total: row.try_get("total")?,
                approvals: row.try_get("approvals")?,
            })
        })
        .collect()
}

/// Overall decision totals for one workspace.
#[instrument(skip(pool))]
pub async fn totals(pool: &PgPool, workspace_id: &str) -> Result<(i64, i64), OutcomeStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (
                        WHERE user_decision IN ('approved', 'auto_executed')
                    ) AS approvals
             FROM sophia.learning_outcomes
             WHERE workspace_id = $1",
            &[&workspace_id],
        )
        .await?;
    Ok((row.try_get("total")?, row.try_get("approvals")?))
}

/// Flag every outcome folded into a bias refresh, so reports can tell
/// applied history from rows still waiting for the next derivation.
#[instrument(skip(pool))]
pub async fn mark_applied(pool: &PgPool, workspace_id: &str) -> Result<u64, OutcomeStorageError> {
    let client = pool.get().await?;
    let rows = client
        .execute(
            "UPDATE sophia.learning_outcomes
             SET applied_to_future = TRUE
             WHERE workspace_id = $1 AND applied_to_future = FALSE",
            &[&workspace_id],
        )
        .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn recent_outcomes(
    pool: &PgPool,
    workspace_id: &str,
    limit: i64,
) -> Result<Vec<LearningOutcome>, OutcomeStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM sophia.learning_outcomes
             WHERE workspace_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            &[&workspace_id, &limit],
        )
        .await?;

    rows.iter().map(row_to_outcome).collect()
}
