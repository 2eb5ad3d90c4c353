use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use sophia_common::db::{group_stats, mark_applied, revenue_summary, totals};
use sophia_common::learning::{self, Insights, derive_bias_table, fold_revenue_signal};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WorkspaceParam {
    pub workspace_id: String,
}

pub async fn insights(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<Insights>, ApiError> {
    let (total, approvals) = totals(&state.pool, &params.workspace_id).await?;
    let groups = group_stats(&state.pool, Some(&params.workspace_id)).await?;
    let (bias, patterns) = derive_bias_table(&groups, &state.learning_config);

    Ok(Json(Insights {
        total_decisions: total,
        approval_rate: learning::approval_rate(total, approvals),
        patterns,
        bias_table: bias.entries(),
    }))
}

/// Recomputes insights, folds the revenue secondary signal into the bias
/// table, and marks the feeding outcomes as applied, so the insight
/// surface can distinguish fresh signal from already-consumed rows.
pub async fn refresh(
    State(state): State<SharedState>,
    Query(params): Query<WorkspaceParam>,
    _auth: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let groups = group_stats(&state.pool, Some(&params.workspace_id)).await?;
    let (mut bias, patterns) = derive_bias_table(&groups, &state.learning_config);

    let revenue = revenue_summary(&state.pool, &params.workspace_id).await?;
    fold_revenue_signal(
        &mut bias,
        &params.workspace_id,
        &revenue.channel_autonomous_shares(),
        &state.learning_config,
    );

    let applied = mark_applied(&state.pool, &params.workspace_id).await?;

    Ok(Json(serde_json::json!({
        "workspace_id": params.workspace_id,
        "bias_entries": bias.len(),
        "bias_table": bias.entries(),
        "patterns": patterns,
        "outcomes_applied": applied,
    })))
}
