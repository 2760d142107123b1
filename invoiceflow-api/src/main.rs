//! # InvoiceFlow API Server
//!
//! REST and WebSocket entry point for the invoice intake service. Handles
//! web and WhatsApp uploads, AI extraction of Dominican fiscal data,
//! accounting exports, and real-time notifications.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p invoiceflow-api
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoiceflow_api::app::{build_router, AppState};
use invoiceflow_api::config::Config;
use invoiceflow_api::notify;
use invoiceflow_shared::auth::password::hash_password;
use invoiceflow_shared::db::{create_pool, run_migrations, DatabaseConfig};
use invoiceflow_shared::models::organization::CreateOrganization;
use invoiceflow_shared::models::user::CreateUser;
use invoiceflow_shared::models::{Organization, Setting, User};
use invoiceflow_shared::redis::{RedisClient, RedisConfig};

/// Creates the initial superuser and organization from `ADMIN_EMAIL` /
/// `ADMIN_PASSWORD` when no user with that email exists yet. Idempotent
/// across restarts.
async fn seed_admin(state: &AppState) -> anyhow::Result<()> {
    let Some(admin) = &state.config.admin else {
        return Ok(());
    };

    if User::find_by_email(&state.db, &admin.email).await?.is_some() {
        return Ok(());
    }

    let organization = Organization::create(
        &state.db,
        CreateOrganization {
            name: "Default".to_string(),
            tax_id: None,
        },
    )
    .await?;

    let password_hash =
        hash_password(&admin.password).map_err(|e| anyhow::anyhow!("admin password: {}", e))?;

    let user = User::create(
        &state.db,
        CreateUser {
            organization_id: organization.id,
            email: admin.email.clone(),
            password_hash,
            full_name: Some("Administrator".to_string()),
            is_superuser: true,
        },
    )
    .await?;

    Setting::seed_defaults(&state.db, organization.id).await?;

    tracing::info!(user_id = %user.id, organization_id = %organization.id, "admin user seeded");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invoiceflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "InvoiceFlow API v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let db = create_pool(db_config).await?;
    run_migrations(&db).await?;

    let redis = RedisClient::new(RedisConfig::from_env()?).await?;

    let bind_address = config.bind_address();
    let state = AppState::new(db, redis, config);

    seed_admin(&state).await?;

    notify::spawn_heartbeat_task(state.hub.clone());

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
