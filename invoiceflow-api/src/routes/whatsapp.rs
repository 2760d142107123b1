//! WhatsApp intake through the Evolution API gateway.
//!
//! The gateway POSTs every inbound event to `/v1/evolution/webhook`. Image
//! and document messages from an authorized number become invoices and run
//! through the extraction pipeline; recognized text commands get a status
//! reply. The webhook always answers 200 so the gateway does not retry.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use invoiceflow_engine::evolution::{
    self, EvolutionClient, EvolutionConfig, InboundContent, InboundMessage,
};
use invoiceflow_engine::media;
use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::invoice::{CreateInvoice, InvoiceFilter};
use invoiceflow_shared::models::{Invoice, Setting};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::notify::WsEvent;
use crate::processing;

/// Inbound messages per sender per minute before replies are dropped.
const SENDER_RATE_LIMIT: u64 = 10;
const SENDER_WINDOW_SECS: u64 = 60;

/// Cached gateway credentials live under `evolution:config:{org}` for an
/// hour. Settings writes purge the prefix so changes take effect quickly.
const CONFIG_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedGatewayConfig {
    base_url: String,
    api_key: String,
    instance: String,
}

/// Resolves the Evolution gateway configuration for an organization from
/// settings, falling back to environment variables, with a Redis cache in
/// front of the settings table.
async fn gateway_config(state: &AppState, organization_id: Uuid) -> ApiResult<EvolutionConfig> {
    let cache_key = format!("evolution:config:{}", organization_id);
    if let Ok(Some(cached)) = state.cache.get::<CachedGatewayConfig>(&cache_key).await {
        return Ok(EvolutionConfig {
            base_url: cached.base_url,
            api_key: cached.api_key,
            instance: cached.instance,
        });
    }

    let base_url = match Setting::get_value(&state.db, organization_id, "evolution_url").await? {
        Some(v) => v,
        None => std::env::var("EVOLUTION_URL")
            .map_err(|_| ApiError::BadRequest("Evolution API no configurada".into()))?,
    };
    let api_key = match Setting::get_value(&state.db, organization_id, "evolution_apikey").await? {
        Some(v) => v,
        None => std::env::var("EVOLUTION_APIKEY")
            .map_err(|_| ApiError::BadRequest("Evolution API no configurada".into()))?,
    };
    let instance = match Setting::get_value(&state.db, organization_id, "evolution_instance").await?
    {
        Some(v) => v,
        None => std::env::var("EVOLUTION_INSTANCE").unwrap_or_else(|_| "invoiceflow".to_string()),
    };

    let cached = CachedGatewayConfig {
        base_url: base_url.clone(),
        api_key: api_key.clone(),
        instance: instance.clone(),
    };
    if let Err(err) = state
        .cache
        .set(&cache_key, &cached, CONFIG_CACHE_TTL_SECS)
        .await
    {
        warn!(error = %err, "failed to cache evolution config");
    }

    Ok(EvolutionConfig {
        base_url,
        api_key,
        instance,
    })
}

/// Finds the organization that authorized this sender's number. Numbers are
/// compared after normalization so device suffixes and formatting do not
/// matter.
async fn organization_for_sender(state: &AppState, phone: &str) -> ApiResult<Option<Uuid>> {
    let rows = Setting::organizations_with_value(&state.db, "authorized_whatsapp_number").await?;
    for (organization_id, value) in rows {
        let authorized = value
            .split(',')
            .any(|n| evolution::is_authorized_sender(n.trim(), phone));
        if authorized {
            return Ok(Some(organization_id));
        }
    }
    Ok(None)
}

/// Best-effort text reply. Failures are logged, never propagated, so a dead
/// gateway cannot break invoice intake.
async fn reply(state: &AppState, organization_id: Uuid, number: &str, text: &str) {
    let config = match gateway_config(state, organization_id).await {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "cannot reply, gateway not configured");
            return;
        }
    };
    let client = EvolutionClient::new(config);
    if let Err(err) = client.send_text(number, text).await {
        warn!(error = %err, number, "whatsapp reply failed");
    }
}

async fn status_reply(state: &AppState, organization_id: Uuid) -> ApiResult<String> {
    let filter = InvoiceFilter {
        processed: Some(false),
        limit: Some(1000),
        ..Default::default()
    };
    let pending = Invoice::list(&state.db, organization_id, &filter).await?.len();
    Ok(format!(
        "Sistema activo. Facturas pendientes de procesar: {}.\n\
         Envía una foto o PDF de tu factura para registrarla.",
        pending
    ))
}

const HELP_REPLY: &str = "Comandos disponibles:\n\
    estado - estado del sistema y facturas pendientes\n\
    ayuda - este mensaje\n\
    Envía una imagen o PDF de una factura para procesarla automáticamente.";

/// Handles a recognized text command, or points the sender at the help text.
async fn handle_text(
    state: &AppState,
    organization_id: Uuid,
    message: &InboundMessage,
    text: &str,
) -> ApiResult<()> {
    let command = text.trim().to_lowercase();
    let response = match command.as_str() {
        "estado" | "status" => status_reply(state, organization_id).await?,
        "help" | "ayuda" => HELP_REPLY.to_string(),
        _ => {
            let auto_reply =
                Setting::get_bool(&state.db, organization_id, "whatsapp_auto_reply", true).await?;
            if !auto_reply {
                return Ok(());
            }
            HELP_REPLY.to_string()
        }
    };
    reply(state, organization_id, &message.sender_phone, &response).await;
    Ok(())
}

/// Display name for a sender, falling back to the phone number when the
/// message carried no push name.
fn sender_display(message: &InboundMessage) -> &str {
    message
        .sender_name
        .as_deref()
        .unwrap_or(&message.sender_phone)
}

/// Stored extension and invoice file type for an inbound media message.
/// Documents arrive as PDFs and must keep the text-extraction path;
/// everything else is treated as an image.
fn media_disposition(mimetype: Option<&str>) -> (&'static str, &'static str) {
    match mimetype {
        Some(mime) if mime.contains("pdf") => ("pdf", "pdf"),
        _ => ("jpg", "image"),
    }
}

/// Downloads the media, stores it as an invoice, and runs extraction. The
/// sender gets a summary of the result when auto-reply is enabled.
async fn handle_media(
    state: &AppState,
    organization_id: Uuid,
    message: &InboundMessage,
) -> ApiResult<()> {
    let config = gateway_config(state, organization_id).await?;
    let client = EvolutionClient::new(config);

    let base64_data = client.get_media_base64(&message.message_id).await?;
    let bytes = media::decode_base64_media(&base64_data)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let mimetype = match &message.content {
        InboundContent::Media { mimetype, .. } => mimetype.as_deref(),
        InboundContent::Text(_) => None,
    };
    let (extension, file_type) = media_disposition(mimetype);

    let filename = media::whatsapp_filename(&message.sender_phone, Utc::now(), extension);
    let dir = format!(
        "{}/{}",
        state.config.storage.upload_dir, organization_id
    );
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| ApiError::InternalError(format!("no se pudo crear el directorio: {}", err)))?;
    let file_path = format!("{}/{}_{}", dir, Uuid::new_v4(), filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|err| ApiError::InternalError(format!("no se pudo guardar el archivo: {}", err)))?;

    let invoice = Invoice::create(
        &state.db,
        CreateInvoice {
            organization_id,
            filename: filename.clone(),
            file_path,
            file_type: file_type.to_string(),
        },
    )
    .await?;

    info!(
        invoice_id = %invoice.id,
        sender = %message.sender_phone,
        "whatsapp invoice stored"
    );

    state
        .hub
        .notify(
            &state.db,
            organization_id,
            WsEvent::WhatsappImageReceived,
            format!("Imagen recibida de {}", sender_display(message)),
            json!({
                "invoice_id": invoice.id,
                "sender": message.sender_phone,
                "filename": filename,
            }),
        )
        .await;

    let auto_reply =
        Setting::get_bool(&state.db, organization_id, "whatsapp_auto_reply", true).await?;

    match processing::run_pipeline(state, organization_id, invoice.id).await {
        Ok(processed) => {
            if auto_reply {
                let text = format!(
                    "Factura registrada.\nProveedor: {}\nTotal: {} {:.2}\nConfianza: {:.0}%",
                    processed.vendor_name.as_deref().unwrap_or("desconocido"),
                    processed.currency,
                    processed.total_amount.unwrap_or(0.0),
                    processed.confidence_score.unwrap_or(0.0) * 100.0,
                );
                reply(state, organization_id, &message.sender_phone, &text).await;
            }
        }
        Err(err) => {
            warn!(invoice_id = %invoice.id, error = %err, "whatsapp extraction failed");
            if auto_reply {
                reply(
                    state,
                    organization_id,
                    &message.sender_phone,
                    "No pude procesar la factura automáticamente. \
                     Quedó guardada para revisión manual.",
                )
                .await;
            }
        }
    }

    Ok(())
}

/// Receives Evolution gateway events.
///
/// # Endpoints
///
/// `POST /v1/evolution/webhook` (public, the gateway cannot authenticate)
///
/// Always answers `{"status": "ok"}` with 200. Unparseable payloads, echoes
/// of our own messages, duplicates, and unauthorized senders are dropped
/// silently so the gateway never retries.
pub async fn inbound_webhook(
    State(state): State<AppState>,
    Json(payload): Json<JsonValue>,
) -> Json<JsonValue> {
    let ok = Json(json!({"status": "ok"}));

    let message = match evolution::parse_webhook(&payload) {
        Some(message) => message,
        None => return ok,
    };

    // First write wins. Gateways redeliver on timeouts.
    match state.cache.mark_message_processed(&message.message_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!(message_id = %message.message_id, "duplicate whatsapp message ignored");
            return ok;
        }
        Err(err) => warn!(error = %err, "message dedup unavailable, processing anyway"),
    }

    let organization_id = match organization_for_sender(&state, &message.sender_phone).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(sender = %message.sender_phone, "unauthorized whatsapp sender");
            return ok;
        }
        Err(err) => {
            warn!(error = %err, "sender lookup failed");
            return ok;
        }
    };

    let rate_key = format!(
        "ratelimit:wa:{}",
        evolution::normalize_phone(&message.sender_phone)
    );
    let decision = state
        .limiter
        .check_fail_open(&rate_key, SENDER_RATE_LIMIT, SENDER_WINDOW_SECS)
        .await;
    if !decision.allowed {
        warn!(sender = %message.sender_phone, "whatsapp sender rate limited");
        return ok;
    }

    let result = match &message.content {
        InboundContent::Text(text) => {
            handle_text(&state, organization_id, &message, text).await
        }
        InboundContent::Media { mimetype, caption } => {
            info!(
                sender = %message.sender_phone,
                mimetype,
                caption = caption.as_deref().unwrap_or(""),
                "whatsapp media received"
            );
            handle_media(&state, organization_id, &message).await
        }
    };

    if let Err(err) = result {
        warn!(error = %err, message_id = %message.message_id, "webhook handling failed");
    }

    ok
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 8, max = 20))]
    pub number: String,
    #[validate(length(min = 1, max = 4096))]
    pub text: String,
}

/// Sends a text message through the organization's gateway instance.
///
/// # Endpoints
///
/// `POST /v1/evolution/send-message`
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<JsonValue>> {
    request
        .validate()
        .map_err(crate::error::validation_details)?;

    let config = gateway_config(&state, auth.organization_id).await?;
    let client = EvolutionClient::new(config);
    client.send_text(&request.number, &request.text).await?;

    Ok(Json(json!({"sent": true})))
}

/// Reports whether the gateway instance has an open WhatsApp session.
///
/// # Endpoints
///
/// `GET /v1/evolution/instance-status`
pub async fn instance_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<JsonValue>> {
    let config = gateway_config(&state, auth.organization_id).await?;
    let instance = config.instance.clone();
    let client = EvolutionClient::new(config);
    let connected = client.is_connected().await?;

    Ok(Json(json!({
        "instance": instance,
        "connected": connected,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_display_falls_back_to_phone() {
        let mut message = InboundMessage {
            message_id: "3EB0".to_string(),
            sender_phone: "18095551234".to_string(),
            sender_name: None,
            content: InboundContent::Text("estado".to_string()),
        };
        assert_eq!(sender_display(&message), "18095551234");

        message.sender_name = Some("Maria".to_string());
        assert_eq!(sender_display(&message), "Maria");
    }

    #[test]
    fn test_pdf_documents_keep_pdf_disposition() {
        assert_eq!(media_disposition(Some("application/pdf")), ("pdf", "pdf"));
        assert_eq!(media_disposition(Some("image/jpeg")), ("jpg", "image"));
        assert_eq!(media_disposition(Some("image/png")), ("jpg", "image"));
        assert_eq!(media_disposition(None), ("jpg", "image"));
    }
}
