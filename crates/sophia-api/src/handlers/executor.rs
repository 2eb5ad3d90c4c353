use axum::{Json, extract::State};
use serde::Deserialize;
use sophia_common::executor::{AutoExecuteOptions, AutoExecuteReport, run_auto_execute};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct RunBatchRequest {
    /// Explicit workspaces force a manual run; omitted means discovery.
    #[serde(default)]
    pub workspaces: Option<Vec<String>>,
    #[serde(default)]
    pub threshold_override: Option<i32>,
    #[serde(default)]
    pub include_approved: bool,
    #[serde(default)]
    pub batch_limit: Option<i64>,
}

impl RunBatchRequest {
    fn into_options(self) -> Result<AutoExecuteOptions, ApiError> {
        if let Some(threshold) = self.threshold_override {
            if !(0..=100).contains(&threshold) {
                return Err(ApiError::BadRequest(
                    "threshold_override must be between 0 and 100".into(),
                ));
            }
        }
        if let Some(workspaces) = &self.workspaces {
            if workspaces.is_empty() {
                return Err(ApiError::BadRequest(
                    "workspaces must be omitted or non-empty".into(),
                ));
            }
        }
        let batch_limit = self.batch_limit.unwrap_or(0);
        if batch_limit < 0 {
            return Err(ApiError::BadRequest("batch_limit must be >= 0".into()));
        }

        Ok(AutoExecuteOptions {
            workspaces: self.workspaces,
            threshold_override: self.threshold_override,
            include_approved: self.include_approved,
            batch_limit,
        })
    }
}

pub async fn run_batch(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Json(request): Json<RunBatchRequest>,
) -> Result<Json<AutoExecuteReport>, ApiError> {
    let options = request.into_options()?;
    let report = run_auto_execute(&state.pool, state.dispatcher.as_ref(), &options).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_threshold_out_of_range() {
        let request = RunBatchRequest {
            threshold_override: Some(150),
            ..Default::default()
        };
        let err = request.into_options().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn rejects_empty_workspace_list() {
        let request = RunBatchRequest {
            workspaces: Some(Vec::new()),
            ..Default::default()
        };
        let err = request.into_options().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn default_request_means_discovery_run() {
        let options = RunBatchRequest::default().into_options().unwrap();
        assert!(options.workspaces.is_none());
        assert_eq!(options.batch_limit, 0);
    }
}
