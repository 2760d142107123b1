/// TTL cache and message deduplication on top of Redis
///
/// Used for dashboard statistics (invalidated whenever an invoice changes),
/// WhatsApp settings lookups, and deduplication of incoming WhatsApp
/// messages so retried webhook deliveries never process the same invoice
/// twice.
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::{RedisClient, RedisClientError};

/// Default cache TTL in seconds
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Dedup markers expire after 24 hours
const DEDUP_TTL_SECS: u64 = 24 * 3600;

/// Hit/miss counters for the cache stats endpoint
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Clone)]
pub struct Cache {
    client: RedisClient,
    counters: Arc<CacheCounters>,
}

impl Cache {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Reads and deserializes a cached value. A missing key or a
    /// deserialization failure both count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RedisClientError> {
        let mut conn = self.client.get_connection();

        let raw: Option<String> = conn.get(key).await?;

        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "cache hit");
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!(key, error = %e, "cache entry failed to deserialize, dropping");
                    let _: () = conn.del(key).await?;
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Serializes and stores a value with the given TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), RedisClientError> {
        let json = serde_json::to_string(value)
            .map_err(|e| RedisClientError::CommandError(format!("Serialization failed: {}", e)))?;

        let mut conn = self.client.get_connection();
        let _: () = conn.set_ex(key, json, ttl_secs).await?;

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), RedisClientError> {
        let mut conn = self.client.get_connection();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Deletes all keys matching a glob pattern, e.g. `stats:*` after an
    /// invoice changes. Uses SCAN so large keyspaces do not block Redis.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64, RedisClientError> {
        let mut conn = self.client.get_connection();
        let mut deleted = 0u64;
        let mut cursor = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern, deleted, "invalidated cache keys");
        Ok(deleted)
    }

    /// Marks a WhatsApp message ID as processed. Returns true if this is the
    /// first time the ID is seen within the dedup window.
    pub async fn mark_message_processed(&self, message_id: &str) -> Result<bool, RedisClientError> {
        let key = format!("processed:msg:{}", message_id);
        let mut conn = self.client.get_connection();

        // SET NX EX is atomic, so concurrent deliveries cannot both win
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;

        Ok(set)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::client::RedisConfig;

    #[test]
    fn test_stats_hit_rate_empty() {
        let counters = CacheCounters::default();
        assert_eq!(counters.hits.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_cache_roundtrip() {
        let client = RedisClient::new(RedisConfig::default_for_test())
            .await
            .unwrap();
        let cache = Cache::new(client);

        cache.set("test:roundtrip", &42i64, 60).await.unwrap();
        let value: Option<i64> = cache.get("test:roundtrip").await.unwrap();
        assert_eq!(value, Some(42));

        cache.delete("test:roundtrip").await.unwrap();
        let value: Option<i64> = cache.get("test:roundtrip").await.unwrap();
        assert_eq!(value, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_mark_message_processed_dedup() {
        let client = RedisClient::new(RedisConfig::default_for_test())
            .await
            .unwrap();
        let cache = Cache::new(client);

        let id = uuid::Uuid::new_v4().to_string();
        assert!(cache.mark_message_processed(&id).await.unwrap());
        assert!(!cache.mark_message_processed(&id).await.unwrap());
    }
}
