use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use sophia_common::db::{
    group_stats, list_open_alerts, list_pending_recommendations, revenue_summary, totals,
};
use sophia_common::learning::{self, Insights, derive_bias_table};
use sophia_common::model::{Alert, Recommendation};
use sophia_common::revenue::RevenueSummary;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct WorkspaceReport {
    pub workspace_id: String,
    pub learning: Insights,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
    pub revenue: RevenueSummary,
}

/// One combined dashboard payload per workspace: learning insights, open
/// alerts, pending recommendations and the revenue rollup.
pub async fn workspace_report(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<WorkspaceReport>, ApiError> {
    let (total, approvals) = totals(&state.pool, &workspace_id).await?;
    let groups = group_stats(&state.pool, Some(&workspace_id)).await?;
    let (bias, patterns) = derive_bias_table(&groups, &state.learning_config);

    let learning = Insights {
        total_decisions: total,
        approval_rate: learning::approval_rate(total, approvals),
        patterns,
        bias_table: bias.entries(),
    };

    let alerts = list_open_alerts(&state.pool, &workspace_id).await?;
    let recommendations = list_pending_recommendations(&state.pool, &workspace_id).await?;
    let revenue = revenue_summary(&state.pool, &workspace_id).await?;

    Ok(Json(WorkspaceReport {
        workspace_id,
        learning,
        alerts,
        recommendations,
        revenue,
    }))
}
