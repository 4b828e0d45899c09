//! Route handlers and the JSON wire mapping.
//!
//! Handlers delegate to the facade one-for-one; the only logic here is
//! translating ids, optional results, and error codes into HTTP shapes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::api::ApiError;
use crate::common::pagination::Page;
use crate::common::{CommitmentId, JobId};
use crate::domains::agents::AgentDetails;
use crate::domains::contracts::{WorkFilter, WorkResult};
use crate::domains::jobs::JobRequest;

use super::AppState;

/// Claim request body for `PUT /api/commitments`.
#[derive(Debug, Deserialize)]
pub struct WorkRequest {
    pub commitment_id: CommitmentId,
    pub job_type: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub agent: AgentDetails,
}

pub async fn put_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<JobRequest>,
) -> Result<StatusCode, ApiError> {
    state.api.put_job(JobId::from_uuid(job_id), request).await?;
    Ok(StatusCode::OK)
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.api.get_job(JobId::from_uuid(job_id)).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Response, ApiError> {
    let jobs = state.api.list_jobs(page).await?;
    Ok(Json(jobs).into_response())
}

pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.api.pause_job(JobId::from_uuid(job_id)).await?;
    Ok(StatusCode::OK)
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.api.retry_job(JobId::from_uuid(job_id)).await?;
    Ok(StatusCode::OK)
}

pub async fn request_work(
    State(state): State<AppState>,
    Json(request): Json<WorkRequest>,
) -> Result<Response, ApiError> {
    let filter = WorkFilter {
        job_type: request.job_type,
        tags: request.tags,
    };
    match state
        .api
        .request_work(request.commitment_id, filter, request.agent)
        .await?
    {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let reply = state
        .api
        .heartbeat(CommitmentId::from_uuid(commitment_id))
        .await?;
    Ok(Json(reply).into_response())
}

pub async fn complete_work(
    State(state): State<AppState>,
    Path(commitment_id): Path<Uuid>,
    Json(result): Json<WorkResult>,
) -> Result<StatusCode, ApiError> {
    state
        .api
        .complete_work(CommitmentId::from_uuid(commitment_id), result)
        .await?;
    Ok(StatusCode::OK)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Conflict { .. } | ApiError::StaleCommitment { .. } => StatusCode::CONFLICT,
            ApiError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay in the logs; clients get the code only.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = ?self, "api operation failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let response = ApiError::Conflict {
            job_id: JobId::new(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn stale_commitment_maps_to_409() {
        let response = ApiError::StaleCommitment {
            commitment_id: CommitmentId::new(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_payload_maps_to_400() {
        let response = ApiError::invalid("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::JobNotFound {
            job_id: JobId::new(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_maps_to_500() {
        let response = ApiError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn work_request_parses_without_tags() {
        let request: WorkRequest = serde_json::from_value(json!({
            "commitment_id": CommitmentId::new(),
            "job_type": "fetch",
            "agent": {
                "hostname": "worker-1",
                "system_name": "crawler",
                "system_version": "1.0.0"
            }
        }))
        .unwrap();
        assert!(request.tags.is_none());
    }
}
