//! Flow endpoints.
//!
//! - `GET /api/flows`: registered flow ids
//! - `POST /api/flows/:flow_id/sessions`: start a dialogue

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, FlowList, StartSessionRequest};
use crate::dialogue::StartReply;

pub async fn list(State(ctx): State<ApiContext>) -> Json<FlowList> {
    Json(FlowList {
        flows: ctx.core.engine.registry().flow_ids(),
    })
}

/// Starting replaces the caller's unfinished session, if any.
pub async fn start(
    State(ctx): State<ApiContext>,
    Path(flow_id): Path<String>,
    Json(context): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartReply>), ApiError> {
    if context.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId is required".into()));
    }
    let reply = ctx.core.engine.start(&flow_id, context)?;
    Ok((StatusCode::CREATED, Json(reply)))
}
