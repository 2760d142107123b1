/// Outbound webhook endpoint management
///
/// # Endpoints
///
/// - `GET    /v1/webhooks`
/// - `POST   /v1/webhooks` - returns the signing secret once, on creation
/// - `DELETE /v1/webhooks/{id}`
/// - `POST   /v1/webhooks/{id}/test` - fires a test delivery

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::webhook_endpoint::{CreateWebhookEndpoint, WebhookEndpoint};
use invoiceflow_shared::webhook::{DeliveryResult, WebhookEvent};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

/// Creation response; the only time the secret is returned in clear
#[derive(Debug, Serialize)]
pub struct CreatedWebhook {
    #[serde(flatten)]
    pub endpoint: WebhookEndpoint,

    /// HMAC signing secret; store it now, it is never shown again
    pub secret: String,
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<WebhookEndpoint>>> {
    let endpoints = WebhookEndpoint::list_by_organization(&state.db, auth.organization_id).await?;

    Ok(Json(endpoints))
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateWebhookEndpoint>,
) -> ApiResult<(StatusCode, Json<CreatedWebhook>)> {
    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return Err(ApiError::BadRequest(
            "Webhook URL must be http or https".to_string(),
        ));
    }

    let endpoint = WebhookEndpoint::create(&state.db, auth.organization_id, req).await?;
    let secret = endpoint.secret.clone();

    Ok((
        StatusCode::CREATED,
        Json(CreatedWebhook { endpoint, secret }),
    ))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = WebhookEndpoint::delete(&state.db, id, auth.organization_id).await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Webhook endpoint not found".to_string()))
    }
}

/// Fires a signed test event at every active endpoint of the org that
/// subscribes to `invoice.processed`, reporting per-endpoint results.
pub async fn test_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<DeliveryResult>>> {
    // Ensure the endpoint exists and belongs to the caller
    WebhookEndpoint::find_by_id_and_org(&state.db, id, auth.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook endpoint not found".to_string()))?;

    let payload = json!({
        "test": true,
        "message": "InvoiceFlow webhook test delivery",
    });

    let results = state
        .webhooks
        .dispatch(
            &state.db,
            auth.organization_id,
            WebhookEvent::InvoiceProcessed,
            &payload,
        )
        .await?;

    let filtered: Vec<DeliveryResult> =
        results.into_iter().filter(|r| r.endpoint_id == id).collect();

    if filtered.is_empty() {
        return Err(ApiError::BadRequest(
            "Endpoint is inactive or not subscribed to invoice.processed".to_string(),
        ));
    }

    Ok(Json(filtered))
}
