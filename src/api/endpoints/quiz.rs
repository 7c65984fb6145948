//! Quiz endpoints.
//!
//! - `POST /api/quiz/preview`: run the distribution calculator directly
//! - `POST /api/quiz/launch`: (re)submit a completed quiz setup

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ConfirmResponse, PreviewRequest, PreviewResponse};
use crate::dialogue::FlowCompleted;
use crate::quiz::{distribute, Difficulty, QuestionType};

pub async fn preview(
    State(ctx): State<ApiContext>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let max = ctx.core.config.max_questions;
    if req.count == 0 || req.count > max {
        return Err(ApiError::BadRequest(format!(
            "count must be between 1 and {max}"
        )));
    }

    let mut types = Vec::with_capacity(req.types.len());
    for name in &req.types {
        let question_type = QuestionType::from_str(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown question type: {name}")))?;
        types.push(question_type);
    }

    let difficulty = match req.difficulty.as_deref() {
        None => Difficulty::Mixed,
        Some(name) => Difficulty::from_str(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown difficulty: {name}")))?,
    };

    let distribution = distribute(req.count, &types, &difficulty.levels())?;
    Ok(Json(PreviewResponse { distribution }))
}

/// Resubmission path after a failed launch. Slot state lives in the event
/// itself and is checked again before anything is sent upstream.
pub async fn launch(
    State(ctx): State<ApiContext>,
    Json(event): Json<FlowCompleted>,
) -> Result<(StatusCode, Json<ConfirmResponse>), ApiError> {
    let launched = ctx.core.launcher.launch(&event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ConfirmResponse::Launched {
            job_id: launched.job_id,
            config: launched.config,
        }),
    ))
}
