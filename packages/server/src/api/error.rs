//! Machine-readable error taxonomy for the dispatch API.
//!
//! Every failure mode a transport adapter can observe maps to a stable
//! code. `anyhow` stays internal; only this enum crosses the facade
//! boundary.

use thiserror::Error;

use crate::common::{CommitmentId, JobId};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Submission of an existing `job_id` with a different request body.
    #[error("job {job_id} already exists with a different request body")]
    Conflict { job_id: JobId },

    /// Completion or heartbeat through a commitment whose contract is no
    /// longer live (finished, or never existed).
    #[error("commitment {commitment_id} no longer holds a live contract")]
    StaleCommitment { commitment_id: CommitmentId },

    /// Pause or retry of a job that was never submitted.
    #[error("job {job_id} does not exist")]
    JobNotFound { job_id: JobId },

    /// Malformed job request (missing job type, dangling dependency
    /// reference, dependency cycle).
    #[error("invalid job request: {reason}")]
    InvalidPayload { reason: String },

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ApiError::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, as rendered on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Conflict { .. } => "conflict",
            ApiError::StaleCommitment { .. } => "stale-commitment",
            ApiError::JobNotFound { .. } => "not-found",
            ApiError::InvalidPayload { .. } => "invalid-payload",
            ApiError::Database(_) | ApiError::Internal(_) => "internal",
        }
    }

    /// Whether the failed transaction is worth retrying: Postgres
    /// serialization failures (40001) and deadlocks (40P01).
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}
