/// Application state and router builder
///
/// Defines the shared application state and builds the Axum router with
/// all routes and middleware.
///
/// # Router layout
///
/// ```text
/// /
/// ├── /health                        # Health check (public)
/// ├── /v1/
/// │   ├── /auth/                     # register, login, refresh (public)
/// │   ├── /evolution/webhook         # WhatsApp inbound (public, gateway-called)
/// │   ├── /ws                        # WebSocket (token via query param)
/// │   └── ... authenticated ...
/// │       ├── /invoices/             # CRUD, upload, process, export
/// │       ├── /settings/             # org settings
/// │       ├── /notifications/
/// │       ├── /webhooks/             # outbound webhook endpoints
/// │       ├── /statistics
/// │       ├── /chat/finance
/// │       ├── /evolution/            # send-message, instance-status
/// │       └── /redis/stats
/// ```
///
/// # Middleware stack
///
/// Applied in order (bottom to top):
/// 1. Logging (tower-http TraceLayer)
/// 2. CORS (tower-http CorsLayer)
/// 3. Security headers
/// 4. Authentication + per-org rate limiting (per-route basis)

use crate::{config::Config, notify::Hub};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use invoiceflow_engine::cost::CostControl;
use invoiceflow_shared::auth::{jwt, middleware::AuthContext};
use invoiceflow_shared::redis::{Cache, RateLimiter, RedisClient};
use invoiceflow_shared::webhook::WebhookDispatcher;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Hard cap on request bodies; the per-org upload limit from settings is
/// enforced separately in the upload handler.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Redis client (connection manager)
    pub redis: RedisClient,

    /// JSON cache over Redis (statistics, Evolution config)
    pub cache: Cache,

    /// Redis-backed fixed-window rate limiter
    pub limiter: RateLimiter,

    /// WebSocket fan-out hub
    pub hub: Hub,

    /// Outbound webhook dispatcher
    pub webhooks: WebhookDispatcher,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    pub fn new(db: PgPool, redis: RedisClient, config: Config) -> Self {
        Self {
            db,
            cache: Cache::new(redis.clone()),
            limiter: RateLimiter::new(redis.clone()),
            redis,
            hub: Hub::new(),
            webhooks: WebhookDispatcher::new(),
            config: Arc::new(config),
        }
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    /// Cost control gate over this state's pool and limiter
    pub fn cost_control(&self) -> CostControl {
        CostControl::new(self.db.clone(), self.limiter.clone())
    }
}

/// Builds the complete Axum router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    // Public: no bearer token
    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    // Called by the Evolution gateway, authenticated by sender allow-list
    let evolution_webhook = Router::new()
        .route("/webhook", post(routes::whatsapp::inbound_webhook));

    // WebSocket carries its token as a query parameter since browsers
    // cannot set headers on the upgrade request
    let ws_routes = Router::new().route("/ws", get(routes::ws::ws_upgrade));

    // Everything below requires a valid access token
    let invoice_routes = Router::new()
        .route("/", get(routes::invoices::list_invoices))
        .route("/upload", post(routes::upload::upload_invoice))
        .route("/export", post(routes::exports::export_invoices))
        .route("/bulk-process", post(routes::invoices::bulk_process))
        .route("/bulk-delete", post(routes::invoices::bulk_delete))
        .route("/push-webhook", post(routes::invoices::push_webhook))
        .route("/:id", get(routes::invoices::get_invoice))
        .route("/:id", put(routes::invoices::update_invoice))
        .route("/:id", delete(routes::invoices::delete_invoice))
        .route("/:id/process", post(routes::invoices::process_invoice));

    let settings_routes = Router::new()
        .route("/", get(routes::settings::list_settings))
        .route("/", put(routes::settings::update_settings));

    let notification_routes = Router::new()
        .route("/", get(routes::notifications::list_notifications))
        .route("/:id/read", post(routes::notifications::mark_read))
        .route("/read-all", post(routes::notifications::mark_all_read));

    let webhook_routes = Router::new()
        .route("/", get(routes::webhooks::list_webhooks))
        .route("/", post(routes::webhooks::create_webhook))
        .route("/:id", delete(routes::webhooks::delete_webhook))
        .route("/:id/test", post(routes::webhooks::test_webhook));

    let evolution_routes = Router::new()
        .route("/send-message", post(routes::whatsapp::send_message))
        .route("/instance-status", get(routes::whatsapp::instance_status));

    let protected = Router::new()
        .nest("/invoices", invoice_routes)
        .nest("/settings", settings_routes)
        .nest("/notifications", notification_routes)
        .nest("/webhooks", webhook_routes)
        .nest("/evolution", evolution_routes)
        .route("/statistics", get(routes::statistics::get_statistics))
        .route("/chat/finance", post(routes::chat::finance_chat))
        .route("/export/csv", get(routes::exports::export_csv))
        .route("/redis/stats", get(routes::health::redis_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::rate_limit_layer,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/evolution", evolution_webhook)
        .merge(ws_routes)
        .merge(protected);

    let cors = if state.config.api.cors_origins.contains(&"*".to_string()) {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::security::security_headers,
        ))
        .with_state(state)
}

/// JWT authentication middleware layer
///
/// Validates the bearer token from the Authorization header and injects
/// an [`AuthContext`] into request extensions.
async fn jwt_auth_layer(
    state: axum::extract::State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, crate::error::ApiError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            crate::error::ApiError::Unauthorized("Missing authorization header".to_string())
        })?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| crate::error::ApiError::BadRequest("Expected Bearer token".to_string()))?;

    let claims = jwt::validate_access_token(token, state.jwt_secret())?;
    let auth_context = AuthContext::from_jwt(claims.sub, claims.organization_id);

    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}
