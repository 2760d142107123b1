/// Notification feed endpoints
///
/// # Endpoints
///
/// - `GET  /v1/notifications?unread_only=true&limit=50`
/// - `POST /v1/notifications/{id}/read`
/// - `POST /v1/notifications/read-all`

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::Notification;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<NotificationListResponse>> {
    let notifications = Notification::list(
        &state.db,
        auth.organization_id,
        query.unread_only,
        query.limit.unwrap_or(50),
    )
    .await?;

    let unread_count = Notification::unread_count(&state.db, auth.organization_id).await?;

    Ok(Json(NotificationListResponse {
        notifications,
        unread_count,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let updated = Notification::mark_read(&state.db, id, auth.organization_id).await?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Notification not found".to_string()))
    }
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    let marked = Notification::mark_all_read(&state.db, auth.organization_id).await?;

    Ok(Json(serde_json::json!({ "marked": marked })))
}
