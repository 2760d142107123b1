/// Health check and cache statistics endpoints
///
/// # Endpoints
///
/// ```text
/// GET /health
/// GET /v1/redis/stats
/// ```
///
/// Health response:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "redis": "connected"
/// }
/// ```

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Application version
    pub version: String,

    /// Database status
    pub database: String,

    /// Redis status
    pub redis: String,
}

/// Health check handler
///
/// Reports service health including database and Redis connectivity.
/// Degraded dependencies surface in the body, not the status code, so
/// load balancers keep routing while operators investigate.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let database = match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let redis = match state.redis.ping().await {
        Ok(true) => "connected",
        _ => "disconnected",
    };

    let status = if database == "connected" && redis == "connected" {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        redis: redis.to_string(),
    }))
}

/// Cache hit/miss statistics for the Redis-backed cache.
pub async fn redis_stats(
    State(state): State<AppState>,
) -> Json<invoiceflow_shared::redis::CacheStats> {
    Json(state.cache.stats())
}
