/// AI spend control
///
/// Every extraction call burns real money, so this module gates requests
/// against a per-organization daily USD budget and an hourly request cap,
/// and prices completed calls from token usage.
use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use invoiceflow_shared::models::Invoice;
use invoiceflow_shared::redis::RateLimiter;

/// USD per 1K tokens, (prompt, completion)
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-vision-preview", 0.01, 0.03),
];

pub const DEFAULT_DAILY_LIMIT_USD: f64 = 10.0;
pub const HOURLY_REQUEST_LIMIT: u64 = 100;

/// Warning fires at this fraction of the daily budget.
pub const DAILY_WARNING_THRESHOLD: f64 = 0.8;
/// Critical fires at this fraction of the hourly request cap.
pub const HOURLY_CRITICAL_THRESHOLD: f64 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum CostError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Budget alert levels, emitted once spend crosses a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostAlert {
    Warning,
    Critical,
}

/// Outcome of a pre-request budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum CostDecision {
    Allowed {
        spent_today_usd: f64,
        alert: Option<CostAlert>,
    },
    DailyLimitReached {
        spent_today_usd: f64,
        limit_usd: f64,
    },
    HourlyLimitReached {
        requests: u64,
    },
}

impl CostDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CostDecision::Allowed { .. })
    }
}

/// Prices a completed call from its token usage. Unknown models are
/// priced as gpt-4o so costs are never silently zero.
pub fn estimate_cost_usd(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let (prompt_rate, completion_rate) = MODEL_PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, p, c)| (*p, *c))
        .unwrap_or_else(|| {
            warn!(model, "unknown model, pricing as gpt-4o");
            (0.005, 0.015)
        });

    (prompt_tokens as f64 / 1000.0) * prompt_rate
        + (completion_tokens as f64 / 1000.0) * completion_rate
}

/// Classifies usage against both gates: critical once the hourly request
/// count nears its cap, warning once today's spend nears the daily budget.
pub fn alert_for_usage(
    spent_usd: f64,
    limit_usd: f64,
    hourly_requests: u64,
) -> Option<CostAlert> {
    if hourly_requests as f64 >= HOURLY_CRITICAL_THRESHOLD * HOURLY_REQUEST_LIMIT as f64 {
        return Some(CostAlert::Critical);
    }

    if limit_usd > 0.0 && spent_usd / limit_usd >= DAILY_WARNING_THRESHOLD {
        return Some(CostAlert::Warning);
    }

    None
}

/// Gates extraction requests per organization.
pub struct CostControl {
    pool: PgPool,
    limiter: RateLimiter,
}

impl CostControl {
    pub fn new(pool: PgPool, limiter: RateLimiter) -> Self {
        Self { pool, limiter }
    }

    /// Sum of AI cost recorded since local midnight UTC.
    pub async fn spent_today_usd(&self, organization_id: Uuid) -> Result<f64, CostError> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();

        Ok(Invoice::ai_cost_since(&self.pool, organization_id, midnight).await?)
    }

    /// Checks both gates before an extraction call. The hourly cap runs
    /// fail-open since a Redis outage should not stop invoice intake.
    pub async fn authorize(
        &self,
        organization_id: Uuid,
        daily_limit_usd: f64,
    ) -> Result<CostDecision, CostError> {
        let key = format!("ratelimit:ai:{}", organization_id);
        let hourly = self
            .limiter
            .check_fail_open(&key, HOURLY_REQUEST_LIMIT, 3600)
            .await;

        if !hourly.allowed {
            return Ok(CostDecision::HourlyLimitReached {
                requests: hourly.current,
            });
        }

        let spent = self.spent_today_usd(organization_id).await?;
        if spent >= daily_limit_usd {
            return Ok(CostDecision::DailyLimitReached {
                spent_today_usd: spent,
                limit_usd: daily_limit_usd,
            });
        }

        Ok(CostDecision::Allowed {
            spent_today_usd: spent,
            alert: alert_for_usage(spent, daily_limit_usd, hourly.current),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost_gpt4o() {
        // 1000 prompt + 500 completion tokens
        let cost = estimate_cost_usd("gpt-4o", 1000, 500);
        assert!((cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_gpt4() {
        let cost = estimate_cost_usd("gpt-4", 2000, 1000);
        assert!((cost - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_priced_as_gpt4o() {
        assert_eq!(
            estimate_cost_usd("gpt-5-turbo", 1000, 1000),
            estimate_cost_usd("gpt-4o", 1000, 1000),
        );
    }

    #[test]
    fn test_daily_spend_warning_threshold() {
        assert_eq!(alert_for_usage(5.0, 10.0, 0), None);
        assert_eq!(alert_for_usage(8.0, 10.0, 0), Some(CostAlert::Warning));
        assert_eq!(alert_for_usage(12.0, 10.0, 0), Some(CostAlert::Warning));
    }

    #[test]
    fn test_hourly_usage_goes_critical() {
        // 90% of the 100-request hourly cap
        assert_eq!(alert_for_usage(0.0, 10.0, 89), None);
        assert_eq!(alert_for_usage(0.0, 10.0, 90), Some(CostAlert::Critical));
        // hourly pressure outranks the daily warning
        assert_eq!(alert_for_usage(9.5, 10.0, 95), Some(CostAlert::Critical));
    }

    #[test]
    fn test_zero_limit_never_warns() {
        assert_eq!(alert_for_usage(1.0, 0.0, 0), None);
    }
}
