/// Organization settings endpoints
///
/// # Endpoints
///
/// - `GET /v1/settings` - all settings grouped by category, password
///   values masked
/// - `PUT /v1/settings` - upsert a list of key/value pairs; user-scoped
///   entries go to the caller's user settings instead
///
/// Writing any setting invalidates the Evolution config cache since the
/// WhatsApp keys may have changed.

use std::collections::BTreeMap;

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use tracing::warn;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::models::setting::{Setting, UserSetting};

use crate::app::AppState;
use crate::error::ApiResult;

/// One setting write
#[derive(Debug, Deserialize)]
pub struct SettingWrite {
    pub key: String,
    pub value: String,

    /// When true, stored as a per-user override instead of org-wide
    #[serde(default)]
    pub user_scoped: bool,
}

/// Update request
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub settings: Vec<SettingWrite>,
}

/// Settings grouped by category, secrets masked.
pub async fn list_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<BTreeMap<String, Vec<Setting>>>> {
    let settings = Setting::list_masked(&state.db, auth.organization_id).await?;

    let mut grouped: BTreeMap<String, Vec<Setting>> = BTreeMap::new();
    for setting in settings {
        grouped
            .entry(setting.category.clone())
            .or_default()
            .push(setting);
    }

    Ok(Json(grouped))
}

/// Upserts a batch of settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut written = 0;

    for entry in req.settings {
        if entry.user_scoped {
            UserSetting::set(&state.db, auth.user_id, &entry.key, &entry.value).await?;
        } else {
            Setting::set_value(&state.db, auth.organization_id, &entry.key, &entry.value).await?;
        }
        written += 1;
    }

    if let Err(e) = state.cache.delete_pattern("evolution:config:*").await {
        warn!(error = %e, "evolution config cache invalidation failed");
    }

    Ok(Json(serde_json::json!({ "updated": written })))
}
