//! Notification endpoints.
//!
//! - `GET /api/notifications`: currently visible notifications
//! - `DELETE /api/notifications/:key`: dismiss one

use axum::extract::{Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DismissResponse, NotificationList};
use crate::notify::NotificationInput;

pub async fn list(State(ctx): State<ApiContext>) -> Json<NotificationList> {
    Json(NotificationList {
        notifications: ctx.core.notifications.visible(),
    })
}

pub async fn dismiss(
    State(ctx): State<ApiContext>,
    Path(key): Path<String>,
) -> Result<Json<DismissResponse>, ApiError> {
    if ctx.core.notifications.get(&key).is_none() {
        return Err(ApiError::NotFound(format!("Notification not found: {key}")));
    }
    let updates = ctx
        .core
        .notifications
        .apply(NotificationInput::Dismiss { key });
    Ok(Json(DismissResponse { updates }))
}
