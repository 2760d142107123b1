/// Redis integration for caching, rate limiting, and deduplication
///
/// - `client`: connection management with automatic reconnection
/// - `cache`: TTL cache for statistics and settings, plus WhatsApp message
///   deduplication
/// - `rate_limit`: fixed-window counters for tenant plans, WhatsApp senders,
///   and hourly AI request limits
///
/// # Example
///
/// ```no_run
/// use invoiceflow_shared::redis::client::{RedisClient, RedisConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = RedisConfig::from_env()?;
/// let client = RedisClient::new(config).await?;
///
/// let healthy = client.ping().await?;
/// println!("Redis healthy: {}", healthy);
/// # Ok(())
/// # }
/// ```

pub mod cache;
pub mod client;
pub mod rate_limit;

pub use cache::{Cache, CacheStats};
pub use client::{RedisClient, RedisClientError, RedisConfig};
pub use rate_limit::{RateLimitDecision, RateLimiter};
