use deadpool_postgres::{GenericClient, PoolError};
use tokio_postgres::types::Json;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::PgPool;
use crate::model::{ActionCandidate, ActionType, Channel, ResponseVariant};

#[derive(Debug, thiserror::Error)]
pub enum CandidateStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map candidate row: {0}")]
    Mapping(String),
}

pub(crate) fn row_to_candidate(row: &Row) -> Result<ActionCandidate, CandidateStorageError> {
    let variants: Json<Vec<ResponseVariant>> = row.try_get("variants")?;
    Ok(ActionCandidate {
        candidate_id: row.try_get("candidate_id")?,
        workspace_id: row.try_get("workspace_id")?,
        action_type: ActionType::parse(row.try_get::<_, String>("action_type")?.as_str())
            .map_err(|err| CandidateStorageError::Mapping(err.to_string()))?,
        channel: Channel::parse(row.try_get::<_, String>("channel")?.as_str())
            .map_err(|err| CandidateStorageError::Mapping(err.to_string()))?,
        target_contact_id: row.try_get("target_contact_id")?,
        target_campaign_id: row.try_get("target_campaign_id")?,
        scheduled_step_id: row.try_get("scheduled_step_id")?,
        variants: variants.0,
        raw_confidence: row.try_get("raw_confidence")?,
        reasoning: row.try_get("reasoning")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a candidate row inside the caller's transaction. Returns false when
/// the candidate id is already present.
pub(crate) async fn insert_candidate(
    client: &impl GenericClient,
    candidate: &ActionCandidate,
) -> Result<bool, PgError> {
    let stmt = client
        .prepare_cached(
            "INSERT INTO sophia.action_candidates (
                candidate_id,
                workspace_id,
                action_type,
                channel,
                target_contact_id,
                target_campaign_id,
                scheduled_step_id,
                variants,
                raw_confidence,
                reasoning,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (candidate_id) DO NOTHING",
        )
        .await?;

    let rows = client
        .execute(
            &stmt,
            &[
                &candidate.candidate_id,
                &candidate.workspace_id,
                &candidate.action_type.as_str(),
                &candidate.channel.as_str(),
                &candidate.target_contact_id,
                &candidate.target_campaign_id,
                &candidate.scheduled_step_id,
                &Json(&candidate.variants),
                &candidate.raw_confidence,
                &candidate.reasoning,
                &candidate.created_at,
            ],
        )
        .await?;

    Ok(rows == 1)
}

#[instrument(skip(pool))]
pub async fn get_candidate(
    pool: &PgPool,
    candidate_id: &str,
) -> Result<Option<ActionCandidate>, CandidateStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT candidate_id, workspace_id, action_type, channel, target_contact_id,
                    target_campaign_id, scheduled_step_id, variants, raw_confidence, reasoning,
                    created_at
             FROM sophia.action_candidates WHERE candidate_id = $1",
            &[&candidate_id],
        )
        .await?;

    row.map(|r| row_to_candidate(&r)).transpose()
}

/// Most recent intake timestamp per workspace, for the stale-intake alert.
#[instrument(skip(pool))]
pub async fn last_candidate_at(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, CandidateStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT MAX(created_at) AS last_at
             FROM sophia.action_candidates WHERE workspace_id = $1",
            &[&workspace_id],
        )
        .await?;
    Ok(row.try_get("last_at")?)
}
