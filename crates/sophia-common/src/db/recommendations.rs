use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::PgPool;
use crate::model::{
    Recommendation, RecommendationDraft, RecommendationKind, RecommendationStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum RecommendationStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map recommendation row: {0}")]
    Mapping(String),
    #[error("recommendation {0} not found")]
    NotFound(i64),
}

fn row_to_recommendation(row: &Row) -> Result<Recommendation, RecommendationStorageError> {
    let kind_raw: String = row.try_get("kind")?;
    let status_raw: String = row.try_get("status")?;
    Ok(Recommendation {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        kind: RecommendationKind::parse(&kind_raw).ok_or_else(|| {
            RecommendationStorageError::Mapping(format!("unknown kind: {kind_raw}"))
        })?,
        priority: row.try_get("priority")?,
        confidence: row.try_get("confidence")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        reason: row.try_get("reason")?,
        action_label: row.try_get("action_label")?,
        potential_impact: row.try_get("potential_impact")?,
        status: RecommendationStatus::parse(&status_raw).ok_or_else(|| {
            RecommendationStorageError::Mapping(format!("unknown status: {status_raw}"))
        })?,
        executed_at: row.try_get("executed_at")?,
        dismissed_at: row.try_get("dismissed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Persist derived drafts. A kind with an open recommendation in the
/// workspace is skipped via the partial unique index, so repeated derivation
/// runs never stack duplicates. Returns how many rows were new.
#[instrument(skip(pool, drafts), fields(count = drafts.len()))]
pub async fn record_recommendations(
    pool: &PgPool,
    workspace_id: &str,
    drafts: &[RecommendationDraft],
) -> Result<u64, RecommendationStorageError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "INSERT INTO sophia.recommendations (
                workspace_id, kind, priority, confidence,
                title, description, reason, action_label, potential_impact
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (workspace_id, kind) WHERE status = 'pending'
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
                    &draft.kind.as_str(),
                    &draft.priority,
                    &draft.confidence,
                    &draft.title,
                    &draft.description,
                    &draft.reason,
                    &draft.action_label,
                    &draft.potential_impact,
                ],
            )
            .await?;
    }
    Ok(inserted)
}

#[instrument(skip(pool))]
pub async fn list_pending_recommendations(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<Vec<Recommendation>, RecommendationStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM sophia.recommendations
             WHERE workspace_id = $1 AND status = 'pending'
             ORDER BY priority DESC, created_at, id",
            &[&workspace_id],
        )
        .await?;
    rows.iter().map(row_to_recommendation).collect()
}

#[instrument(skip(pool))]
pub async fn get_recommendation(
    pool: &PgPool,
    id: i64,
) -> Result<Option<Recommendation>, RecommendationStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT * FROM sophia.recommendations WHERE id = $1", &[&id])
        .await?;
    row.map(|r| row_to_recommendation(&r)).transpose()
}

/// Conditionally move a pending recommendation to `executed`. The bool says
/// whether this call made the transition; callers apply side effects only
/// when it did, which keeps repeated execute calls harmless.
#[instrument(skip(pool))]
pub async fn execute_recommendation(
    pool: &PgPool,
    id: i64,
) -> Result<(Recommendation, bool), RecommendationStorageError> {
    transition(pool, id, "executed", "executed_at").await
}

/// Conditionally move a pending recommendation to `dismissed`.
#[instrument(skip(pool))]
pub async fn dismiss_recommendation(
    pool: &PgPool,
    id: i64,
) -> Result<(Recommendation, bool), RecommendationStorageError> {
    transition(pool, id, "dismissed", "dismissed_at").await
}

async fn transition(
    pool: &PgPool,
    id: i64,
    status: &str,
    stamp_column: &str,
) -> Result<(Recommendation, bool), RecommendationStorageError> {
    let client = pool.get().await?;
    let query = format!(
        "UPDATE sophia.recommendations
         SET status = $2, {stamp_column} = NOW()
         WHERE id = $1 AND status = 'pending'
         RETURNING *"
    );
    let row = client.query_opt(&query, &[&id, &status]).await?;

    match row {
        Some(row) => Ok((row_to_recommendation(&row)?, true)),
        None => {
            let current = get_recommendation(pool, id)
                .await?
                .ok_or(RecommendationStorageError::NotFound(id))?;
            Ok((current, false))
        }
    }
}
