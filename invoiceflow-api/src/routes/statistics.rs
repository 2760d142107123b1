/// Dashboard statistics endpoint
///
/// # Endpoint
///
/// ```text
/// GET /v1/statistics
/// ```
///
/// Aggregates totals, a monthly series, the category breakdown, and AI
/// cost figures. Cached in Redis for 5 minutes under `stats:{org}`;
/// processing, updates, and deletes invalidate the whole `stats:*` space.

use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::invoice::{CategoryTotal, InvoiceStats, ModelCost, MonthlyTotal};
use invoiceflow_shared::models::Invoice;

use crate::app::AppState;
use crate::error::ApiResult;

const CACHE_TTL_SECS: u64 = 300;
const MONTHLY_WINDOW: i32 = 12;

/// Complete statistics payload
#[derive(Debug, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub totals: InvoiceStats,
    pub monthly: Vec<MonthlyTotal>,
    pub categories: Vec<CategoryTotal>,
    pub ai_costs: AiCostStats,
}

/// AI spend over different windows
#[derive(Debug, Serialize, Deserialize)]
pub struct AiCostStats {
    pub total_usd: f64,
    pub today_usd: f64,
    pub week_usd: f64,
    pub by_model: Vec<ModelCost>,
}

pub async fn get_statistics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<StatisticsResponse>> {
    let cache_key = format!("stats:{}", auth.organization_id);

    match state.cache.get::<StatisticsResponse>(&cache_key).await {
        Ok(Some(cached)) => return Ok(Json(cached)),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "statistics cache read failed"),
    }

    let totals = Invoice::stats(&state.db, auth.organization_id).await?;
    let monthly = Invoice::monthly_totals(&state.db, auth.organization_id, MONTHLY_WINDOW).await?;
    let categories = Invoice::category_breakdown(&state.db, auth.organization_id).await?;

    let now = Utc::now();
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();

    let today_usd = Invoice::ai_cost_since(&state.db, auth.organization_id, midnight).await?;
    let week_usd =
        Invoice::ai_cost_since(&state.db, auth.organization_id, now - Duration::days(7)).await?;
    let by_model = Invoice::ai_cost_by_model(&state.db, auth.organization_id).await?;

    let response = StatisticsResponse {
        ai_costs: AiCostStats {
            total_usd: totals.total_ai_cost_usd,
            today_usd,
            week_usd,
            by_model,
        },
        totals,
        monthly,
        categories,
    };

    if let Err(e) = state.cache.set(&cache_key, &response, CACHE_TTL_SECS).await {
        warn!(error = %e, "statistics cache write failed");
    }

    Ok(Json(response))
}
