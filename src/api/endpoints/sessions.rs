//! Dialogue session endpoints.
//!
//! - `POST /api/sessions/:id/messages`: one user turn
//! - `GET /api/sessions/:id`: snapshot for reconnecting clients
//! - `POST /api/sessions/:id/confirm`: Start or Edit on the summary

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ConfirmRequest, ConfirmResponse, MessageRequest};
use crate::dialogue::registry::QUIZ_SETUP;
use crate::dialogue::{ConfirmOutcome, IngestReply, SessionSnapshot};
use crate::launcher::LaunchError;
use crate::notify::submission_key;

pub async fn message(
    State(ctx): State<ApiContext>,
    Path(session_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<IngestReply>, ApiError> {
    let reply = ctx.core.engine.ingest(&session_id, &req.text).await?;
    Ok(Json(reply))
}

pub async fn snapshot(
    State(ctx): State<ApiContext>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(ctx.core.engine.snapshot(&session_id).await?))
}

/// Start on a quiz setup submits the generation job right away. Other flows
/// simply complete.
pub async fn confirm(
    State(ctx): State<ApiContext>,
    Path(session_id): Path<String>,
    Json(req): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<ConfirmResponse>), ApiError> {
    let outcome = ctx.core.engine.confirm(&session_id, req.action).await?;

    let event = match outcome {
        ConfirmOutcome::Editing { stage, prompts } => {
            return Ok((StatusCode::OK, Json(ConfirmResponse::Editing { stage, prompts })));
        }
        ConfirmOutcome::Completed { event } => event,
    };

    if event.flow_id != QUIZ_SETUP {
        return Ok((
            StatusCode::OK,
            Json(ConfirmResponse::Completed {
                flow_id: event.flow_id,
                session_id: event.session_id,
            }),
        ));
    }

    match ctx.core.launcher.launch(&event).await {
        Ok(launched) => Ok((
            StatusCode::ACCEPTED,
            Json(ConfirmResponse::Launched {
                job_id: launched.job_id,
                config: launched.config,
            }),
        )),
        Err(LaunchError::Submission(e)) => {
            tracing::warn!(session_id = %event.session_id, error = %e, "Quiz launch failed");
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(ConfirmResponse::SubmissionFailed {
                    notification_key: submission_key(&event.session_id),
                    message: e.to_string(),
                    event,
                }),
            ))
        }
        Err(other) => Err(other.into()),
    }
}
