use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::{borrow::Cow, future::Future};
use thiserror::Error;
use tracing::error;

use sophia_common::db::{
    AlertStorageError, ApprovalStorageError, CandidateStorageError, OutcomeStorageError,
    RecommendationStorageError, RevenueStorageError, SettingsStorageError,
};
use sophia_common::executor::ExecutorError;
use sophia_common::model::InvalidCandidate;
use sophia_common::revenue::AttributionError;

tokio::task_local! {
    static REQUEST_ID: String;
}

fn sanitize_message(message: &str) -> String {
    const MAX_LEN: usize = 240;

    let mut cleaned = message
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .replace(['\n', '\r'], " ");

    cleaned = cleaned
        .split_whitespace()
        .map(|token| {
            if token.contains("://") {
                "[redacted-url]".to_string()
            } else if let Some((base, _)) = token.split_once('?') {
                if base.is_empty() {
                    "[redacted-query]".to_string()
                } else {
                    format!("{base}?[redacted]")
                }
            } else if token.starts_with('/') || token.contains('\\') {
                "[redacted-path]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.len() > MAX_LEN {
        cleaned.truncate(MAX_LEN);
        cleaned.push('…');
    }

    if cleaned.trim().is_empty() {
        "unexpected error".to_string()
    } else {
        cleaned
    }
}

pub async fn with_request_id<Fut, T>(request_id: Option<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    if let Some(request_id) = request_id {
        REQUEST_ID.scope(request_id, fut).await
    } else {
        fut.await
    }
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|value| value.clone()).ok()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();
        let request_id = current_request_id();

        error!(
            code,
            status = %status,
            request_id = request_id.as_deref().unwrap_or(""),
            error = %self,
            "api_error"
        );

        let body = Json(ErrorResponse {
            code,
            message: self.public_message().into_owned(),
            request_id,
        });

        (status, body).into_response()
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Database(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> Cow<'static, str> {
        match self {
            ApiError::BadRequest(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::Unauthorized(_) => Cow::Borrowed("unauthorized"),
            ApiError::NotFound(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::Conflict(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::TooManyRequests(_) => Cow::Borrowed("too many requests"),
            ApiError::ServiceUnavailable(_) => Cow::Borrowed("service unavailable"),
            ApiError::Database(_) | ApiError::Internal(_) => Cow::Borrowed("internal server error"),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<InvalidCandidate> for ApiError {
    fn from(value: InvalidCandidate) -> Self {
        ApiError::BadRequest(value.to_string())
    }
}

impl From<ApprovalStorageError> for ApiError {
    fn from(value: ApprovalStorageError) -> Self {
        match value {
            ApprovalStorageError::NotFound(id) => {
                ApiError::NotFound(format!("approval item {id} not found"))
            }
            ApprovalStorageError::DuplicateCandidate(id) => {
                ApiError::Conflict(format!("candidate {id} already has an approval item"))
            }
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<CandidateStorageError> for ApiError {
    fn from(value: CandidateStorageError) -> Self {
        ApiError::Database(value.to_string())
    }
}

impl From<SettingsStorageError> for ApiError {
    fn from(value: SettingsStorageError) -> Self {
        match value {
            SettingsStorageError::Invalid(msg) => ApiError::BadRequest(msg),
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<OutcomeStorageError> for ApiError {
    fn from(value: OutcomeStorageError) -> Self {
        ApiError::Database(value.to_string())
    }
}

impl From<AlertStorageError> for ApiError {
    fn from(value: AlertStorageError) -> Self {
        ApiError::Database(value.to_string())
    }
}

impl From<RecommendationStorageError> for ApiError {
    fn from(value: RecommendationStorageError) -> Self {
        match value {
            RecommendationStorageError::NotFound(id) => {
                ApiError::NotFound(format!("recommendation {id} not found"))
            }
            other => ApiError::Database(other.to_string()),
        }
    }
}

impl From<RevenueStorageError> for ApiError {
    fn from(value: RevenueStorageError) -> Self {
        ApiError::Database(value.to_string())
    }
}

impl From<AttributionError> for ApiError {
    fn from(value: AttributionError) -> Self {
        match value {
            AttributionError::NoTouchpoints(_) => ApiError::NotFound(value.to_string()),
            AttributionError::NegativeDealValue(_) => ApiError::BadRequest(value.to_string()),
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(value: ExecutorError) -> Self {
        match value {
            ExecutorError::WorkspaceNotConfigured(_) => ApiError::Conflict(value.to_string()),
            other => ApiError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;

    use super::*;

    #[tokio::test]
    async fn includes_request_id_in_response_body_when_present() {
        let err = ApiError::Internal("boom".into());
        let response = with_request_id(Some("req-123".into()), async { err.into_response() }).await;

        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = body.collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["request_id"], "req-123");
    }

    #[test]
    fn duplicate_candidate_maps_to_conflict() {
        let err: ApiError = ApprovalStorageError::DuplicateCandidate("cand-1".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn sanitize_strips_urls_and_paths() {
        let message = sanitize_message("failed at https://db.internal/reset /var/lib/secret");
        assert!(message.contains("[redacted-url]"));
        assert!(message.contains("[redacted-path]"));
    }
}
