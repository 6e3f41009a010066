use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::api::{identity::Identity, AppState};
use crate::error::{AppError, Result};
use crate::models::Notification;

async fn list_notifications(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>> {
    let notifications = Notification::list_for_user(&state.pool, identity.user_id, 50).await?;
    Ok(Json(json!({
        "success": true,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}

async fn mark_read(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let updated = Notification::mark_read(&state.pool, id, identity.user_id).await?;
    if updated == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(Json(json!({ "success": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_read))
}
