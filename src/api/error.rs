//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::dialogue::DialogueError;
use crate::jobs::JobError;
use crate::launcher::LaunchError;
use crate::quiz::DistributionError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Generator unavailable: {0}")]
    GeneratorUnavailable(String),
    #[error("Generator rejected job: {0}")]
    GeneratorRejected(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail.clone()),
            ApiError::GeneratorUnavailable(detail) => (
                StatusCode::BAD_GATEWAY,
                "GENERATOR_UNAVAILABLE",
                detail.clone(),
            ),
            ApiError::GeneratorRejected(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "GENERATOR_REJECTED",
                detail.clone(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<DialogueError> for ApiError {
    fn from(err: DialogueError) -> Self {
        match err {
            DialogueError::FlowNotFound(_)
            | DialogueError::SessionNotFound(_)
            | DialogueError::StageNotFound(_) => ApiError::NotFound(err.to_string()),
            DialogueError::NotAwaitingConfirmation(_) | DialogueError::FlowAlreadyRegistered(_) => {
                ApiError::Conflict(err.to_string())
            }
            DialogueError::Incomplete(_) | DialogueError::InvalidSlot { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            DialogueError::InvalidFlow(_) | DialogueError::LockPoisoned => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<DistributionError> for ApiError {
    fn from(err: DistributionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::Rejected { .. } => ApiError::GeneratorRejected(err.to_string()),
            JobError::Transport(_)
            | JobError::Upstream { .. }
            | JobError::TransientSubmission(_)
            | JobError::Stream(_) => ApiError::GeneratorUnavailable(err.to_string()),
            JobError::Decode(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LaunchError> for ApiError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::UnsupportedFlow(_) => ApiError::BadRequest(err.to_string()),
            LaunchError::Parameters(e) => e.into(),
            LaunchError::Distribution(e) => e.into(),
            LaunchError::Submission(e) => e.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
