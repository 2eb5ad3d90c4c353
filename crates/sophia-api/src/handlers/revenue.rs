use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sophia_common::db::{
    deal_touchpoints, get_attribution as fetch_attribution, record_touchpoint, revenue_summary,
    upsert_attribution,
};
use sophia_common::model::Channel;
use sophia_common::revenue::{
    self, EqualWeight, RevenueAttribution, RevenueSummary, Touchpoint,
};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WorkspaceParam {
    pub workspace_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTouchpointRequest {
    pub workspace_id: String,
    pub deal_id: String,
    pub contact_id: String,
    pub channel: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub autonomous: bool,
    #[serde(default)]
    pub approval_item_id: Option<i64>,
}

pub async fn submit_touchpoint(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Json(request): Json<SubmitTouchpointRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let channel = Channel::parse(&request.channel)?;

    let touchpoint = Touchpoint {
        channel,
        occurred_at: request.occurred_at.unwrap_or_else(Utc::now),
        autonomous: request.autonomous,
        approval_item_id: request.approval_item_id,
    };

    let id = record_touchpoint(
        &state.pool,
        &request.workspace_id,
        &request.deal_id,
        &request.contact_id,
        &touchpoint,
    )
    .await?;

    Ok(Json(serde_json::json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct AttributeDealRequest {
    pub workspace_id: String,
    pub deal_id: String,
    pub contact_id: String,
    pub deal_value_cents: i64,
}

/// Compute and store the attribution for a closed deal from its recorded
/// touchpoints. Re-attributing replaces the stored record.
pub async fn attribute_deal(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Json(request): Json<AttributeDealRequest>,
) -> Result<Json<RevenueAttribution>, ApiError> {
    let touchpoints =
        deal_touchpoints(&state.pool, &request.workspace_id, &request.deal_id).await?;

    let attribution = revenue::attribute(
        &request.deal_id,
        request.deal_value_cents,
        &request.contact_id,
        &request.workspace_id,
        touchpoints,
        &EqualWeight,
    )?;

    upsert_attribution(&state.pool, &attribution).await?;
    Ok(Json(attribution))
}

pub async fn get_attribution(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(deal_id): Path<String>,
) -> Result<Json<RevenueAttribution>, ApiError> {
    let attribution = fetch_attribution(&state.pool, &deal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no attribution for deal {deal_id}")))?;

    Ok(Json(attribution))
}

pub async fn summary(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<RevenueSummary>, ApiError> {
    let summary = revenue_summary(&state.pool, &params.workspace_id).await?;
    Ok(Json(summary))
}
