/// Invoice processing orchestration
///
/// Glues the pieces together for one document: settings resolution, the
/// AI budget gate, the extraction engine, persistence, realtime
/// notifications, outbound webhooks, and statistics cache invalidation.
/// Handlers either await this directly or spawn it for bulk runs.

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use invoiceflow_engine::cost::{CostAlert, CostDecision, DEFAULT_DAILY_LIMIT_USD};
use invoiceflow_engine::extract::Extractor;
use invoiceflow_engine::openai::OpenAiClient;
use invoiceflow_shared::models::invoice::{ExtractionResultUpdate, InvoiceFilter};
use invoiceflow_shared::models::{Invoice, LineItem, Setting};
use invoiceflow_shared::webhook::WebhookEvent;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::notify::WsEvent;

/// OpenAI access resolved from settings with env fallback.
pub struct AiSettings {
    pub api_key: String,
    pub model: String,
    pub daily_limit_usd: f64,
}

/// Reads the OpenAI settings for an organization. The API key falls back
/// to `OPENAI_API_KEY` so fresh installs work before settings are saved.
pub async fn resolve_ai_settings(state: &AppState, organization_id: Uuid) -> ApiResult<AiSettings> {
    let api_key = match Setting::get_value(&state.db, organization_id, "openai_api_key").await? {
        Some(key) => key,
        None => std::env::var("OPENAI_API_KEY").map_err(|_| {
            ApiError::BadRequest(
                "OpenAI API key is not configured. Set it under settings".to_string(),
            )
        })?,
    };

    let model = Setting::get_value(&state.db, organization_id, "openai_model")
        .await?
        .unwrap_or_else(|| "gpt-4o".to_string());

    let daily_limit_usd = Setting::get_float(
        &state.db,
        organization_id,
        "openai_daily_limit",
        DEFAULT_DAILY_LIMIT_USD,
    )
    .await?;

    Ok(AiSettings {
        api_key,
        model,
        daily_limit_usd,
    })
}

/// Checks the AI budget gates, emitting a cost alert when spend is close
/// to or over the limit. Returns an error when the request must not run.
pub async fn check_budget(
    state: &AppState,
    organization_id: Uuid,
    daily_limit_usd: f64,
) -> ApiResult<()> {
    let decision = state
        .cost_control()
        .authorize(organization_id, daily_limit_usd)
        .await?;

    match decision {
        CostDecision::Allowed { alert: None, .. } => Ok(()),
        CostDecision::Allowed {
            spent_today_usd,
            alert: Some(alert),
        } => {
            let level = match alert {
                CostAlert::Warning => "warning",
                CostAlert::Critical => "critical",
            };
            let data = json!({
                "level": level,
                "spent_today_usd": spent_today_usd,
                "daily_limit_usd": daily_limit_usd,
            });

            state
                .hub
                .notify(
                    &state.db,
                    organization_id,
                    WsEvent::CostAlert,
                    format!(
                        "El gasto de IA de hoy (${:.2}) se acerca al límite diario de ${:.2}",
                        spent_today_usd, daily_limit_usd
                    ),
                    data.clone(),
                )
                .await;

            if let Err(e) = state
                .webhooks
                .dispatch(&state.db, organization_id, WebhookEvent::CostAlert, &data)
                .await
            {
                warn!(error = %e, "cost alert webhook dispatch failed");
            }

            Ok(())
        }
        CostDecision::DailyLimitReached {
            spent_today_usd,
            limit_usd,
        } => Err(ApiError::RateLimitExceeded {
            retry_after: 3600,
            message: format!(
                "Daily AI budget reached (${:.2} of ${:.2})",
                spent_today_usd, limit_usd
            ),
        }),
        CostDecision::HourlyLimitReached { requests } => Err(ApiError::RateLimitExceeded {
            retry_after: 3600,
            message: format!("Hourly AI request limit reached ({} requests)", requests),
        }),
    }
}

/// Runs the full extraction pipeline for one invoice and returns it with
/// extracted fields persisted.
pub async fn run_pipeline(
    state: &AppState,
    organization_id: Uuid,
    invoice_id: Uuid,
) -> ApiResult<Invoice> {
    let invoice = Invoice::find_by_id_and_org(&state.db, invoice_id, organization_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invoice not found".to_string()))?;

    let settings = resolve_ai_settings(state, organization_id).await?;
    check_budget(state, organization_id, settings.daily_limit_usd).await?;

    state
        .hub
        .broadcast(
            organization_id,
            WsEvent::ProcessingStarted,
            json!({ "invoice_id": invoice_id, "filename": invoice.filename }),
        )
        .await;

    let bytes = tokio::fs::read(&invoice.file_path).await.map_err(|e| {
        error!(error = %e, path = %invoice.file_path, "stored invoice file unreadable");
        ApiError::InternalError("Stored invoice file is unreadable".to_string())
    })?;

    let extractor = Extractor::new(OpenAiClient::new(settings.api_key), settings.model);
    let outcome = match extractor.extract(&invoice.filename, &bytes).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let data = json!({ "invoice_id": invoice_id, "error": e.to_string() });
            if let Err(we) = state
                .webhooks
                .dispatch(&state.db, organization_id, WebhookEvent::InvoiceFailed, &data)
                .await
            {
                warn!(error = %we, "failure webhook dispatch failed");
            }
            return Err(e.into());
        }
    };

    let extracted = outcome.invoice;
    let update = ExtractionResultUpdate {
        vendor_name: Some(extracted.vendor_name),
        invoice_number: extracted.invoice_number,
        invoice_date: extracted.invoice_date,
        payment_date: extracted.payment_date,
        total_amount: extracted.total_amount,
        tax_amount: extracted.tax_amount,
        currency: extracted.currency,
        transaction_type: extracted.transaction_type,
        category: Some(extracted.category),
        description: extracted.description,
        line_items: extracted
            .line_items
            .into_iter()
            .map(|item| LineItem {
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
            })
            .collect(),
        raw_extracted_data: Some(extracted.raw),
        confidence_score: Some(extracted.confidence_score),
        audit_flags: extracted.audit_flags,
        vendor_tax_id: extracted.vendor_tax_id,
        vendor_country: extracted.vendor_country,
        vendor_fiscal_address: extracted.vendor_fiscal_address,
        country_detection_method: Some(extracted.country_detection_method),
        country_confidence: Some(extracted.country_confidence),
        goods_services_type: Some(extracted.goods_services_type),
        isr_retention_type: extracted.isr_retention_type,
        isr_retention_amount: extracted.isr_retention_amount,
        itbis_retained: extracted.itbis_retained,
        payment_method: extracted.payment_method,
        ai_tokens_used: outcome.tokens_used as i32,
        ai_cost_usd: outcome.cost_usd,
        ai_model_used: Some(outcome.model),
        ai_processing_secs: Some(outcome.processing_secs),
    };

    let updated = Invoice::apply_extraction(&state.db, invoice_id, organization_id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invoice disappeared during processing".to_string()))?;

    info!(
        invoice_id = %invoice_id,
        vendor = ?updated.vendor_name,
        cost_usd = outcome.cost_usd,
        "invoice processed"
    );

    state
        .hub
        .notify(
            &state.db,
            organization_id,
            WsEvent::ProcessingComplete,
            format!(
                "Factura de {} procesada",
                updated.vendor_name.as_deref().unwrap_or("proveedor desconocido")
            ),
            json!({
                "invoice_id": invoice_id,
                "vendor_name": updated.vendor_name,
                "total_amount": updated.total_amount,
                "confidence_score": updated.confidence_score,
            }),
        )
        .await;

    let payload = serde_json::to_value(&updated)
        .unwrap_or_else(|_| json!({ "invoice_id": invoice_id }));
    if let Err(e) = state
        .webhooks
        .dispatch(
            &state.db,
            organization_id,
            WebhookEvent::InvoiceProcessed,
            &payload,
        )
        .await
    {
        warn!(error = %e, "processed webhook dispatch failed");
    }

    if !updated.audit_flags.0.is_empty() {
        let data = json!({
            "invoice_id": invoice_id,
            "vendor_name": updated.vendor_name,
            "audit_flags": updated.audit_flags.0,
        });
        if let Err(e) = state
            .webhooks
            .dispatch(&state.db, organization_id, WebhookEvent::AuditAlert, &data)
            .await
        {
            warn!(error = %e, "audit webhook dispatch failed");
        }
    }

    invalidate_statistics(state).await;

    Ok(updated)
}

/// Processes every pending invoice for an organization, sequentially, with
/// per-invoice progress broadcasts. Run from a spawned task.
pub async fn run_bulk(state: AppState, organization_id: Uuid) {
    let filter = InvoiceFilter {
        processed: Some(false),
        limit: Some(500),
        ..Default::default()
    };

    let pending = match Invoice::list(&state.db, organization_id, &filter).await {
        Ok(list) => list,
        Err(e) => {
            error!(error = %e, "bulk process could not list pending invoices");
            return;
        }
    };

    let total = pending.len();
    info!(organization_id = %organization_id, total, "bulk processing started");

    for (index, invoice) in pending.into_iter().enumerate() {
        let result = run_pipeline(&state, organization_id, invoice.id).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(_) => "failed",
        };
        if let Err(e) = result {
            warn!(invoice_id = %invoice.id, error = %e, "bulk item failed");
        }

        state
            .hub
            .broadcast(
                organization_id,
                WsEvent::StatisticsUpdate,
                json!({
                    "bulk_progress": { "done": index + 1, "total": total, "last_status": status }
                }),
            )
            .await;
    }

    info!(organization_id = %organization_id, total, "bulk processing finished");
}

/// Drops all cached statistics entries after data changes.
pub async fn invalidate_statistics(state: &AppState) {
    if let Err(e) = state.cache.delete_pattern("stats:*").await {
        warn!(error = %e, "statistics cache invalidation failed");
    }
}
