//! Conversational finance assistant.
//!
//! Answers free-form questions about the organization's invoices by handing
//! the model a compact JSON summary of recent activity together with the
//! question. Chat usage is charged against the same daily AI budget as
//! extraction.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use invoiceflow_engine::cost::estimate_cost_usd;
use invoiceflow_engine::openai::{OpenAiClient, CHAT_MODEL};
use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::invoice::InvoiceFilter;
use invoiceflow_shared::models::Invoice;

use crate::app::AppState;
use crate::error::{validation_details, ApiError, ApiResult};
use crate::processing;

/// Invoices summarized into the chat context. Larger windows cost more
/// tokens without improving answers much.
const CONTEXT_INVOICES: i64 = 25;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Builds the JSON context the assistant reasons over.
async fn financial_context(state: &AppState, organization_id: Uuid) -> ApiResult<String> {
    let stats = Invoice::stats(&state.db, organization_id).await?;
    let categories = Invoice::category_breakdown(&state.db, organization_id).await?;

    let filter = InvoiceFilter {
        processed: Some(true),
        limit: Some(CONTEXT_INVOICES),
        ..Default::default()
    };
    let recent: Vec<_> = Invoice::list(&state.db, organization_id, &filter)
        .await?
        .into_iter()
        .map(|inv| {
            json!({
                "vendor": inv.vendor_name,
                "date": inv.invoice_date,
                "total": inv.total_amount,
                "currency": inv.currency,
                "category": inv.category,
                "type": inv.transaction_type,
            })
        })
        .collect();

    let context = json!({
        "totals": {
            "invoices": stats.total_invoices,
            "processed": stats.processed_invoices,
            "pending": stats.pending_invoices,
            "total_amount": stats.total_amount,
        },
        "by_category": categories,
        "recent_invoices": recent,
    });

    serde_json::to_string(&context)
        .map_err(|err| ApiError::InternalError(format!("context serialization failed: {}", err)))
}

/// Answers a finance question against the organization's invoice history.
///
/// # Endpoints
///
/// `POST /v1/chat/finance`
///
/// # Errors
///
/// Returns 429 when the daily AI budget is exhausted and 503 when the
/// model API is unreachable.
pub async fn finance_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    request.validate().map_err(validation_details)?;

    let settings = processing::resolve_ai_settings(&state, auth.organization_id).await?;
    processing::check_budget(&state, auth.organization_id, settings.daily_limit_usd).await?;

    let context = financial_context(&state, auth.organization_id).await?;

    let client = OpenAiClient::new(settings.api_key);
    let completion = client.chat(&context, &request.question).await?;

    let cost_usd = estimate_cost_usd(
        CHAT_MODEL,
        completion.prompt_tokens,
        completion.completion_tokens,
    );
    let tokens_used = completion.total_tokens();

    info!(
        organization_id = %auth.organization_id,
        tokens_used,
        cost_usd,
        "finance chat answered"
    );

    Ok(Json(ChatResponse {
        answer: completion.content,
        tokens_used,
        cost_usd,
    }))
}
