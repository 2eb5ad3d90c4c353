use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use sophia_common::db::{
    dismiss_recommendation, effective_settings, execute_recommendation, group_stats,
    list_pending_recommendations, record_recommendations, upsert_settings,
};
use sophia_common::model::Recommendation;
use sophia_common::recommend::{apply_to_settings, derive_recommendations};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WorkspaceParam {
    pub workspace_id: String,
}

pub async fn list_pending(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<Vec<Recommendation>>, ApiError> {
    let recommendations = list_pending_recommendations(&state.pool, &params.workspace_id).await?;
    Ok(Json(recommendations))
}

/// Re-derive recommendations from the workspace's current settings and
/// decision history. Kinds that already have an open recommendation are
/// deduplicated by the store.
pub async fn refresh(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = effective_settings(&state.pool, &params.workspace_id).await?;
    let groups = group_stats(&state.pool, Some(&params.workspace_id)).await?;
    let drafts = derive_recommendations(&settings, &groups, &state.recommend_config);
    let inserted = record_recommendations(&state.pool, &params.workspace_id, &drafts).await?;

    Ok(Json(serde_json::json!({
        "workspace_id": params.workspace_id,
        "derived": drafts.len(),
        "recorded": inserted,
    })))
}

/// Executing a settings-backed recommendation also applies the settings
/// change, but only when this call made the pending -> executed transition.
/// Repeated execute calls report the current state without re-applying.
pub async fn execute(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Recommendation>, ApiError> {
    let (recommendation, transitioned) = execute_recommendation(&state.pool, id).await?;

    if transitioned {
        let mut settings = effective_settings(&state.pool, &recommendation.workspace_id).await?;
        if apply_to_settings(recommendation.kind, &mut settings) {
            upsert_settings(&state.pool, &settings).await?;
        }
    }

    Ok(Json(recommendation))
}

pub async fn dismiss(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Recommendation>, ApiError> {
    let (recommendation, _) = dismiss_recommendation(&state.pool, id).await?;
    Ok(Json(recommendation))
}
