use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use sophia_common::db::{
    ApprovalFilter, ApprovalListResponse, Pagination, approve_item, get_item, list_items,
    override_item, reject_item,
};
use sophia_common::model::{ApprovalItem, ApprovalStatus, DecisionType};

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ListApprovalsParams {
    pub workspace_id: Option<String>,
    pub status: Option<String>,
    pub decision_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListApprovalsParams {
    fn into_filter(self) -> Result<(ApprovalFilter, Pagination), ApiError> {
        let status = self
            .status
            .as_deref()
            .map(|raw| {
                ApprovalStatus::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unsupported status filter: {raw}")))
            })
            .transpose()?;

        let decision_type = self
            .decision_type
            .as_deref()
            .map(|raw| {
                DecisionType::parse(raw).ok_or_else(|| {
                    ApiError::BadRequest(format!("unsupported decision_type filter: {raw}"))
                })
            })
            .transpose()?;

        let pagination = Pagination {
            limit: self.limit.unwrap_or(50),
            offset: self.offset.unwrap_or(0),
        };
        if pagination.limit <= 0 || pagination.limit > 200 {
            return Err(ApiError::BadRequest(
                "limit must be between 1 and 200".into(),
            ));
        }
        if pagination.offset < 0 {
            return Err(ApiError::BadRequest("offset must be >= 0".into()));
        }

        Ok((
            ApprovalFilter {
                workspace_id: self.workspace_id,
                status,
                decision_type,
            },
            pagination,
        ))
    }
}

pub async fn list_approvals(
    State(state): State<SharedState>,
    Query(params): Query<ListApprovalsParams>,
    _auth: AuthUser,
) -> Result<Json<ApprovalListResponse>, ApiError> {
    let (filter, pagination) = params.into_filter()?;
    let response = list_items(&state.pool, &filter, &pagination).await?;
    Ok(Json(response))
}

pub async fn get_approval(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApprovalItem>, ApiError> {
    let item = get_item(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("approval item {id} not found")))?;

    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub chosen_variant: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub reason: String,
}

fn status_response(status: ApprovalStatus) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": status.as_str() }))
}

/// Approving an item that already left pending is a no-op; the caller
/// gets the current status back either way.
pub async fn approve(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = approve_item(&state.pool, id, &auth.subject, request.chosen_variant).await?;
    Ok(status_response(status))
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct BulkApproveResult {
    pub id: i64,
    pub status: ApprovalStatus,
}

/// Approve a batch of items in one call. Items that already left pending
/// report their current status instead of failing, so a reviewer racing
/// the scheduler still gets a full result list.
pub async fn bulk_approve(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(request): Json<BulkApproveRequest>,
) -> Result<Json<Vec<BulkApproveResult>>, ApiError> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must be non-empty".into()));
    }
    if request.ids.len() > 200 {
        return Err(ApiError::BadRequest(
            "at most 200 items per bulk approval".into(),
        ));
    }

    let mut results = Vec::with_capacity(request.ids.len());
    for id in request.ids {
        let status = approve_item(&state.pool, id, &auth.subject, None).await?;
        results.push(BulkApproveResult { id, status });
    }

    Ok(Json(results))
}

pub async fn reject(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = reject_item(&state.pool, id).await?;
    Ok(status_response(status))
}

pub async fn override_decision(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("override reason is required".into()));
    }

    let status = override_item(&state.pool, id, &request.reason).await?;
    Ok(status_response(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_status_filter() {
        let params = ListApprovalsParams {
            status: Some("sideways".into()),
            ..Default::default()
        };

        let err = params.into_filter().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn rejects_out_of_range_limit() {
        let params = ListApprovalsParams {
            limit: Some(500),
            ..Default::default()
        };

        let err = params.into_filter().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn defaults_pagination() {
        let (_, pagination) = ListApprovalsParams::default().into_filter().unwrap();
        assert_eq!(pagination.limit, 50);
        assert_eq!(pagination.offset, 0);
    }
}
