use deadpool_postgres::PoolError;
use tokio_postgres::types::Json;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::PgPool;
use crate::model::Channel;
use crate::revenue::{
    AttributedTouchpoint, RevenueAttribution, RevenueSummary, Touchpoint, summarize,
};

#[derive(Debug, thiserror::Error)]
pub enum RevenueStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map revenue row: {0}")]
    Mapping(String),
}

/// Record a touchpoint as it happens. The executor writes one for every
/// effect it lands; human-approved executions arrive through the same path
/// with `autonomous = false`.
#[instrument(skip(pool, touchpoint))]
pub async fn record_touchpoint(
    pool: &PgPool,
    workspace_id: &str,
    deal_id: &str,
    contact_id: &str,
    touchpoint: &Touchpoint,
) -> Result<i64, RevenueStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO sophia.touchpoints (
                workspace_id, deal_id, contact_id, channel,
                occurred_at, autonomous, approval_item_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id",
            &[
                &workspace_id,
                &deal_id,
                &contact_id,
                &touchpoint.channel.as_str(),
                &touchpoint.occurred_at,
                &touchpoint.autonomous,
                &touchpoint.approval_item_id,
            ],
        )
        .await?;
    Ok(row.get("id"))
}

/// A deal's touchpoints in journey order, oldest first.
#[instrument(skip(pool))]
pub async fn deal_touchpoints(
    pool: &PgPool,
    workspace_id: &str,
    deal_id: &str,
) -> Result<Vec<Touchpoint>, RevenueStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT channel, occurred_at, autonomous, approval_item_id
             FROM sophia.touchpoints
             WHERE workspace_id = $1 AND deal_id = $2
             ORDER BY occurred_at, id",
            &[&workspace_id, &deal_id],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(Touchpoint {
                channel: Channel::parse(row.try_get::<_, String>("channel")?.as_str())
                    .map_err(|err| RevenueStorageError::Mapping(err.to_string()))?,
                occurred_at: row.try_get("occurred_at")?,
                autonomous: row.try_get("autonomous")?,
                approval_item_id: row.try_get("approval_item_id")?,
            })
        })
        .collect()
}

fn row_to_attribution(row: &Row) -> Result<RevenueAttribution, RevenueStorageError> {
    let touchpoints: Json<Vec<AttributedTouchpoint>> = row.try_get("touchpoints")?;
    Ok(RevenueAttribution {
        deal_id: row.try_get("deal_id")?,
        deal_value_cents: row.try_get("deal_value_cents")?,
        contact_id: row.try_get("contact_id")?,
        workspace_id: row.try_get("workspace_id")?,
        touchpoints: touchpoints.0,
        autonomous_majority: row.try_get("autonomous_majority")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Store the computed attribution. Re-attributing a deal (say, after a value
/// correction) replaces the previous record.
#[instrument(skip(pool, attribution), fields(deal_id = %attribution.deal_id))]
pub async fn upsert_attribution(
    pool: &PgPool,
    attribution: &RevenueAttribution,
) -> Result<(), RevenueStorageError> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO sophia.revenue_attributions (
                workspace_id, deal_id, contact_id, deal_value_cents,
                autonomous_majority, touchpoints
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (deal_id) DO UPDATE SET
                workspace_id = EXCLUDED.workspace_id,
                contact_id = EXCLUDED.contact_id,
                deal_value_cents = EXCLUDED.deal_value_cents,
                autonomous_majority = EXCLUDED.autonomous_majority,
                touchpoints = EXCLUDED.touchpoints,
                created_at = NOW()",
            &[
                &attribution.workspace_id,
                &attribution.deal_id,
                &attribution.contact_id,
                &attribution.deal_value_cents,
                &attribution.autonomous_majority,
                &Json(&attribution.touchpoints),
            ],
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_attribution(
    pool: &PgPool,
    deal_id: &str,
) -> Result<Option<RevenueAttribution>, RevenueStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT * FROM sophia.revenue_attributions WHERE deal_id = $1",
            &[&deal_id],
        )
        .await?;
    row.map(|r| row_to_attribution(&r)).transpose()
}

/// All stored attributions for a workspace, newest first.
#[instrument(skip(pool))]
pub async fn list_attributions(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<Vec<RevenueAttribution>, RevenueStorageError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT * FROM sophia.revenue_attributions
             WHERE workspace_id = $1
             ORDER BY created_at DESC, deal_id",
            &[&workspace_id],
        )
        .await?;
    rows.iter().map(row_to_attribution).collect()
}

/// Workspace rollup with per-channel credit and journey-length buckets.
#[instrument(skip(pool))]
pub async fn revenue_summary(
    pool: &PgPool,
    workspace_id: &str,
) -> Result<RevenueSummary, RevenueStorageError> {
    let attributions = list_attributions(pool, workspace_id).await?;
    Ok(summarize(&attributions))
}
