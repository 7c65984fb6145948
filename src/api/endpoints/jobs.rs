//! `GET /api/jobs/:id`: latest tracked status of a generation job.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::jobs::JobRecord;

pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    ctx.core
        .tracker
        .record(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))
}
