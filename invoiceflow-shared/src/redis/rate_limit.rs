/// Fixed-window rate limiting counters
///
/// A counter per key is INCRed on every hit; the first hit in a window sets
/// the expiry. Callers decide the key scheme, e.g. `ratelimit:wa:{phone}`
/// for WhatsApp senders or `ratelimit:ai:{org}` for hourly extraction
/// requests.
///
/// Redis being down must not take invoice intake down with it, so
/// [`check_fail_open`] treats Redis errors as "allowed".
use redis::AsyncCommands;
use tracing::warn;

use super::client::{RedisClient, RedisClientError};

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,

    /// Hits used inside the current window, including this one
    pub current: u64,

    /// Window size in seconds, returned so callers can set Retry-After
    pub window_secs: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    client: RedisClient,
}

impl RateLimiter {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// Counts a hit against `key` and checks it against `max_hits` per
    /// `window_secs` window.
    pub async fn check(
        &self,
        key: &str,
        max_hits: u64,
        window_secs: u64,
    ) -> Result<RateLimitDecision, RedisClientError> {
        let mut conn = self.client.get_connection();

        let current: u64 = conn.incr(key, 1u64).await?;

        // First hit in the window owns the expiry
        if current == 1 {
            let _: () = conn.expire(key, window_secs as i64).await?;
        }

        Ok(RateLimitDecision {
            allowed: current <= max_hits,
            current,
            window_secs,
        })
    }

    /// Like [`check`](Self::check), but a Redis failure allows the request.
    pub async fn check_fail_open(&self, key: &str, max_hits: u64, window_secs: u64) -> RateLimitDecision {
        match self.check(key, max_hits, window_secs).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(key, error = %e, "rate limit check failed, allowing request");
                RateLimitDecision {
                    allowed: true,
                    current: 0,
                    window_secs,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::client::RedisConfig;

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_rate_limit_window() {
        let client = RedisClient::new(RedisConfig::default_for_test())
            .await
            .unwrap();
        let limiter = RateLimiter::new(client);

        let key = format!("test:ratelimit:{}", uuid::Uuid::new_v4());

        for i in 1..=3 {
            let decision = limiter.check(&key, 3, 60).await.unwrap();
            assert!(decision.allowed, "hit {} should be allowed", i);
        }

        let decision = limiter.check(&key, 3, 60).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.current, 4);
    }
}
