use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use sophia_common::db::{dismiss_alert, list_open_alerts};
use sophia_common::model::Alert;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WorkspaceParam {
    pub workspace_id: String,
}

pub async fn list_alerts(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let alerts = list_open_alerts(&state.pool, &params.workspace_id).await?;
    Ok(Json(alerts))
}

pub async fn dismiss(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dismissed = dismiss_alert(&state.pool, id, &auth.subject).await?;
    Ok(Json(serde_json::json!({ "dismissed": dismissed })))
}
