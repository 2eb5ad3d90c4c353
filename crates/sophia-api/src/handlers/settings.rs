use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use sophia_common::db::{effective_settings, upsert_settings};
use sophia_common::model::{AutoExecuteSettings, ScheduleInterval};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// Returns stored settings, or the safe defaults for a workspace that has
/// never been configured.
pub async fn get_settings(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(workspace_id): Path<String>,
) -> Result<Json<AutoExecuteSettings>, ApiError> {
    let settings = effective_settings(&state.pool, &workspace_id).await?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
pub struct PutSettingsRequest {
    pub enabled: bool,
    pub confidence_threshold: i32,
    #[serde(default)]
    pub schedule_interval: Option<ScheduleInterval>,
}

impl PutSettingsRequest {
    fn into_settings(self, workspace_id: String) -> AutoExecuteSettings {
        AutoExecuteSettings {
            workspace_id,
            enabled: self.enabled,
            confidence_threshold: self.confidence_threshold,
            schedule_interval: self.schedule_interval.unwrap_or(ScheduleInterval::Off),
        }
    }
}

/// Stores the policy and echoes the row now in effect.
pub async fn put_settings(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(workspace_id): Path<String>,
    Json(request): Json<PutSettingsRequest>,
) -> Result<Json<AutoExecuteSettings>, ApiError> {
    let settings = request.into_settings(workspace_id);
    upsert_settings(&state.pool, &settings).await?;
    Ok(Json(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_request_maps_to_effective_row() {
        let request = PutSettingsRequest {
            enabled: true,
            confidence_threshold: 90,
            schedule_interval: None,
        };
        let settings = request.into_settings("ws-1".to_string());
        assert_eq!(settings.workspace_id, "ws-1");
        assert!(settings.enabled);
        assert_eq!(settings.confidence_threshold, 90);
        assert_eq!(settings.schedule_interval, ScheduleInterval::Off);
    }
}
