/// Invoice CRUD and processing endpoints
///
/// # Endpoints
///
/// - `GET    /v1/invoices` - filtered listing with pagination
/// - `GET    /v1/invoices/{id}`
/// - `PUT    /v1/invoices/{id}` - manual review corrections
/// - `DELETE /v1/invoices/{id}` - also removes the stored file
/// - `POST   /v1/invoices/bulk-delete`
/// - `POST   /v1/invoices/{id}/process` - run the extraction pipeline
/// - `POST   /v1/invoices/bulk-process` - background run over pending
/// - `POST   /v1/invoices/push-webhook` - re-push selected invoices

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::invoice::{InvoiceFilter, UpdateInvoice};
use invoiceflow_shared::models::Invoice;
use invoiceflow_shared::webhook::WebhookEvent;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::processing;

/// Listing response with pagination echo
#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<Invoice>,
    pub count: usize,
}

/// Bulk operation request
#[derive(Debug, Deserialize)]
pub struct BulkIds {
    pub ids: Vec<Uuid>,
}

/// Bulk operation response
#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub requested: usize,
    pub affected: usize,
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<InvoiceFilter>,
) -> ApiResult<Json<InvoiceListResponse>> {
    let invoices = Invoice::list(&state.db, auth.organization_id, &filter).await?;
    let count = invoices.len();

    Ok(Json(InvoiceListResponse { invoices, count }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let invoice = Invoice::find_by_id_and_org(&state.db, id, auth.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invoice not found".to_string()))?;

    Ok(Json(invoice))
}

/// Manual review corrections. Only the provided fields are written; the
/// statistics cache is invalidated since amounts may have changed.
pub async fn update_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateInvoice>,
) -> ApiResult<Json<Invoice>> {
    let invoice = Invoice::update(&state.db, id, auth.organization_id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invoice not found".to_string()))?;

    processing::invalidate_statistics(&state).await;

    Ok(Json(invoice))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let file_path = Invoice::delete(&state.db, id, auth.organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invoice not found".to_string()))?;

    if let Err(e) = tokio::fs::remove_file(&file_path).await {
        // Row is gone either way; a stale file is an operational cleanup
        warn!(path = %file_path, error = %e, "failed to remove stored file");
    }

    processing::invalidate_statistics(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BulkIds>,
) -> ApiResult<Json<BulkResult>> {
    let requested = req.ids.len();
    let mut affected = 0;

    for id in req.ids {
        if let Some(file_path) = Invoice::delete(&state.db, id, auth.organization_id).await? {
            affected += 1;
            if let Err(e) = tokio::fs::remove_file(&file_path).await {
                warn!(path = %file_path, error = %e, "failed to remove stored file");
            }
        }
    }

    processing::invalidate_statistics(&state).await;

    Ok(Json(BulkResult { requested, affected }))
}

/// Runs the extraction pipeline for one invoice and returns the result.
pub async fn process_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let invoice = processing::run_pipeline(&state, auth.organization_id, id).await?;

    Ok(Json(invoice))
}

/// Kicks off background processing of all pending invoices. Progress is
/// reported over the WebSocket hub.
pub async fn bulk_process(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<StatusCode> {
    info!(organization_id = %auth.organization_id, "bulk processing requested");

    tokio::spawn(processing::run_bulk(state.clone(), auth.organization_id));

    Ok(StatusCode::ACCEPTED)
}

/// Re-pushes selected invoices to the org's webhook endpoints as
/// `invoice.processed` events.
pub async fn push_webhook(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BulkIds>,
) -> ApiResult<Json<BulkResult>> {
    let requested = req.ids.len();
    let mut affected = 0;

    for id in req.ids {
        let Some(invoice) =
            Invoice::find_by_id_and_org(&state.db, id, auth.organization_id).await?
        else {
            continue;
        };

        let payload = serde_json::to_value(&invoice).unwrap_or_else(|_| json!({ "id": id }));
        match state
            .webhooks
            .dispatch(
                &state.db,
                auth.organization_id,
                WebhookEvent::InvoiceProcessed,
                &payload,
            )
            .await
        {
            Ok(results) if results.iter().any(|r| r.success) => affected += 1,
            Ok(_) => {}
            Err(e) => warn!(invoice_id = %id, error = %e, "webhook re-push failed"),
        }
    }

    Ok(Json(BulkResult { requested, affected }))
}
