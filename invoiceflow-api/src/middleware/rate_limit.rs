/// Per-organization API rate limiting
///
/// Limits are applied per organization based on its plan, using the shared
/// Redis fixed-window counter so they hold across server instances. The
/// check runs fail-open: a Redis outage degrades to unlimited rather than
/// refusing traffic.
///
/// # Limits by plan
///
/// - **free**: 60 requests/minute
/// - **pro**: 300 requests/minute
/// - **enterprise**: 1000 requests/minute
///
/// # Storage
///
/// Redis keys `ratelimit:api:{organization_id}`, 60 second windows.
///
/// # Headers
///
/// Responses include:
/// - `X-RateLimit-Limit`: requests allowed per window
/// - `X-RateLimit-Remaining`: requests left in the current window
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Extension, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::Organization;

const WINDOW_SECS: u64 = 60;

/// Requests per minute for a plan name. Unknown plans get the free tier.
pub fn limit_for_plan(plan: &str) -> u64 {
    match plan {
        "pro" => 300,
        "enterprise" => 1000,
        _ => 60,
    }
}

pub async fn rate_limit_layer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let organization = Organization::find_by_id(&state.db, auth.organization_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(organization_id = %auth.organization_id, "organization not found");
            ApiError::Unauthorized("Organization not found".to_string())
        })?;

    let limit = limit_for_plan(&organization.plan);
    let key = format!("ratelimit:api:{}", auth.organization_id);
    let decision = state.limiter.check_fail_open(&key, limit, WINDOW_SECS).await;

    if !decision.allowed {
        return Err(ApiError::RateLimitExceeded {
            retry_after: WINDOW_SECS,
            message: format!(
                "Rate limit of {} requests per minute exceeded. Try again shortly",
                limit
            ),
        });
    }

    let remaining = limit.saturating_sub(decision.current);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_for_plan() {
        assert_eq!(limit_for_plan("free"), 60);
        assert_eq!(limit_for_plan("pro"), 300);
        assert_eq!(limit_for_plan("enterprise"), 1000);
        assert_eq!(limit_for_plan("something-else"), 60);
    }
}
