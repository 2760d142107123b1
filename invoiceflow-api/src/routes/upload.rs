/// Invoice upload endpoint
///
/// # Endpoint
///
/// ```text
/// POST /v1/invoices/upload
/// Content-Type: multipart/form-data
/// ```
///
/// Accepts one `file` part. The extension must be on the media whitelist
/// and the size under the org's `security_max_upload_size_mb` setting.
/// The file is stored under the upload directory with a UUID prefix and a
/// pending invoice row is created.

use axum::{
    extract::{Extension, Multipart, State},
    Json,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use invoiceflow_engine::media::{self, MediaKind};
use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::invoice::CreateInvoice;
use invoiceflow_shared::models::{Invoice, Setting};
use invoiceflow_shared::webhook::WebhookEvent;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::notify::WsEvent;

const DEFAULT_MAX_UPLOAD_MB: i64 = 10;

/// Multipart upload handler
///
/// # Errors
///
/// - `400 Bad Request`: missing file part or unsupported extension
/// - `413 Payload Too Large`: file exceeds the configured limit
pub async fn upload_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> ApiResult<Json<Invoice>> {
    let max_mb = Setting::get_int(
        &state.db,
        auth.organization_id,
        "security_max_upload_size_mb",
        DEFAULT_MAX_UPLOAD_MB,
    )
    .await?;
    let max_bytes = (max_mb as usize) * 1024 * 1024;

    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("File part is missing a filename".to_string()))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;

        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing 'file' part".to_string()))?;

    if bytes.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "File exceeds the {} MB upload limit",
            max_mb
        )));
    }

    let kind = media::classify(&filename)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let file_type = match kind {
        MediaKind::Image => "image",
        MediaKind::Pdf => "pdf",
    };

    // UUID prefix keeps colliding client filenames apart on disk
    let stored_name = format!("{}_{}", Uuid::new_v4(), filename);
    let dir = std::path::Path::new(&state.config.storage.upload_dir)
        .join(auth.organization_id.to_string());
    let path = dir.join(&stored_name);

    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        ApiError::InternalError(format!("Failed to create upload directory: {}", e))
    })?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store file: {}", e)))?;

    let invoice = Invoice::create(
        &state.db,
        CreateInvoice {
            organization_id: auth.organization_id,
            filename: filename.clone(),
            file_path: path.to_string_lossy().to_string(),
            file_type: file_type.to_string(),
        },
    )
    .await?;

    info!(
        invoice_id = %invoice.id,
        filename = %filename,
        size_bytes = bytes.len(),
        "invoice uploaded"
    );

    let data = json!({
        "invoice_id": invoice.id,
        "filename": filename,
        "file_type": file_type,
    });

    state
        .hub
        .notify(
            &state.db,
            auth.organization_id,
            WsEvent::InvoiceUploaded,
            format!("Factura {} recibida", filename),
            data.clone(),
        )
        .await;

    if let Err(e) = state
        .webhooks
        .dispatch(
            &state.db,
            auth.organization_id,
            WebhookEvent::InvoiceUploaded,
            &data,
        )
        .await
    {
        warn!(error = %e, "upload webhook dispatch failed");
    }

    Ok(Json(invoice))
}
