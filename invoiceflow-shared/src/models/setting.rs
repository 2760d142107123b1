/// Organization and user settings
///
/// Settings are typed key/value rows scoped to an organization. A fixed
/// catalog of defaults is seeded for every new organization so the UI always
/// has a complete set to render. Values with type `password` are masked when
/// listed; the raw value is only readable through `get_value`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Placeholder returned instead of secret values
pub const MASKED_VALUE: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub key: String,
    pub value: String,

    /// One of: string, int, float, boolean, password, json
    pub value_type: String,

    /// Settings group for UI layout (ai, company, whatsapp, security, email, storage)
    pub category: String,

    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user preferences, same shape as org settings but untyped
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSetting {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the default settings catalog
struct DefaultSetting {
    key: &'static str,
    value: &'static str,
    value_type: &'static str,
    category: &'static str,
    description: &'static str,
}

/// Catalog of settings seeded for every organization.
const DEFAULT_SETTINGS: &[DefaultSetting] = &[
    // AI extraction
    DefaultSetting {
        key: "openai_api_key",
        value: "",
        value_type: "password",
        category: "ai",
        description: "OpenAI API key used for invoice extraction",
    },
    DefaultSetting {
        key: "openai_model",
        value: "gpt-4o",
        value_type: "string",
        category: "ai",
        description: "Model used for vision and text extraction",
    },
    DefaultSetting {
        key: "openai_daily_limit",
        value: "10.0",
        value_type: "float",
        category: "ai",
        description: "Daily AI spend limit in USD",
    },
    DefaultSetting {
        key: "openai_max_tokens",
        value: "4000",
        value_type: "int",
        category: "ai",
        description: "Maximum completion tokens per extraction request",
    },
    // Company profile
    DefaultSetting {
        key: "company_name",
        value: "",
        value_type: "string",
        category: "company",
        description: "Legal company name",
    },
    DefaultSetting {
        key: "company_tax_id",
        value: "",
        value_type: "string",
        category: "company",
        description: "Company RNC for DGII reports",
    },
    DefaultSetting {
        key: "company_address",
        value: "",
        value_type: "string",
        category: "company",
        description: "Fiscal address",
    },
    DefaultSetting {
        key: "default_currency",
        value: "USD",
        value_type: "string",
        category: "company",
        description: "Currency assumed when none is detected",
    },
    // WhatsApp intake
    DefaultSetting {
        key: "authorized_whatsapp_number",
        value: "",
        value_type: "string",
        category: "whatsapp",
        description: "Phone number allowed to submit invoices",
    },
    DefaultSetting {
        key: "whatsapp_auto_reply",
        value: "true",
        value_type: "boolean",
        category: "whatsapp",
        description: "Send confirmation replies for received invoices",
    },
    DefaultSetting {
        key: "evolution_url",
        value: "",
        value_type: "string",
        category: "whatsapp",
        description: "Evolution API base URL",
    },
    DefaultSetting {
        key: "evolution_apikey",
        value: "",
        value_type: "password",
        category: "whatsapp",
        description: "Evolution API key",
    },
    DefaultSetting {
        key: "evolution_instance",
        value: "",
        value_type: "string",
        category: "whatsapp",
        description: "Evolution instance name",
    },
    // Security
    DefaultSetting {
        key: "security_max_upload_size_mb",
        value: "10",
        value_type: "int",
        category: "security",
        description: "Maximum upload size in megabytes",
    },
    // Email notifications
    DefaultSetting {
        key: "smtp_host",
        value: "",
        value_type: "string",
        category: "email",
        description: "SMTP server hostname",
    },
    DefaultSetting {
        key: "smtp_port",
        value: "587",
        value_type: "int",
        category: "email",
        description: "SMTP server port",
    },
    DefaultSetting {
        key: "smtp_user",
        value: "",
        value_type: "string",
        category: "email",
        description: "SMTP username",
    },
    DefaultSetting {
        key: "smtp_password",
        value: "",
        value_type: "password",
        category: "email",
        description: "SMTP password",
    },
    DefaultSetting {
        key: "notification_email",
        value: "",
        value_type: "string",
        category: "email",
        description: "Address that receives alert emails",
    },
    // Storage
    DefaultSetting {
        key: "storage_retention_days",
        value: "365",
        value_type: "int",
        category: "storage",
        description: "Days to keep uploaded invoice files",
    },
];

impl Setting {
    /// Seeds the default settings catalog for a new organization. Existing
    /// keys are left untouched.
    pub async fn seed_defaults(pool: &PgPool, organization_id: Uuid) -> Result<(), sqlx::Error> {
        for def in DEFAULT_SETTINGS {
            sqlx::query(
                r#"
                INSERT INTO settings (organization_id, key, value, value_type, category, description)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (organization_id, key) DO NOTHING
                "#,
            )
            .bind(organization_id)
            .bind(def.key)
            .bind(def.value)
            .bind(def.value_type)
            .bind(def.category)
            .bind(def.description)
            .execute(pool)
            .await?;
        }

        Ok(())
    }

    /// Reads a single raw value. Returns None when the key is unset or empty.
    pub async fn get_value(
        pool: &PgPool,
        organization_id: Uuid,
        key: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM settings WHERE organization_id = $1 AND key = $2",
        )
        .bind(organization_id)
        .bind(key)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|(v,)| v).filter(|v| !v.is_empty()))
    }

    /// Lists every organization that has a non-empty value for `key`,
    /// together with that value. Used by the WhatsApp webhook to map an
    /// inbound sender to the organization that authorized it.
    pub async fn organizations_with_value(
        pool: &PgPool,
        key: &str,
    ) -> Result<Vec<(Uuid, String)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT organization_id, value FROM settings WHERE key = $1 AND value <> ''",
        )
        .bind(key)
        .fetch_all(pool)
        .await
    }

    /// Reads a float-typed setting, falling back to `default` when unset or
    /// unparseable.
    pub async fn get_float(
        pool: &PgPool,
        organization_id: Uuid,
        key: &str,
        default: f64,
    ) -> Result<f64, sqlx::Error> {
        let value = Self::get_value(pool, organization_id, key).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(default))
    }

    /// Reads an int-typed setting with a fallback.
    pub async fn get_int(
        pool: &PgPool,
        organization_id: Uuid,
        key: &str,
        default: i64,
    ) -> Result<i64, sqlx::Error> {
        let value = Self::get_value(pool, organization_id, key).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(default))
    }

    /// Reads a boolean-typed setting with a fallback. Accepts "true"/"1".
    pub async fn get_bool(
        pool: &PgPool,
        organization_id: Uuid,
        key: &str,
        default: bool,
    ) -> Result<bool, sqlx::Error> {
        let value = Self::get_value(pool, organization_id, key).await?;
        Ok(value
            .map(|v| v == "true" || v == "1")
            .unwrap_or(default))
    }

    /// Upserts a value for an existing or new key.
    pub async fn set_value(
        pool: &PgPool,
        organization_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO settings (organization_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (organization_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(organization_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Lists all settings for an organization with password values masked.
    pub async fn list_masked(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut settings = sqlx::query_as::<_, Setting>(
            r#"
            SELECT id, organization_id, key, value, value_type, category, description, updated_at
            FROM settings
            WHERE organization_id = $1
            ORDER BY category, key
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await?;

        for setting in &mut settings {
            if setting.value_type == "password" && !setting.value.is_empty() {
                setting.value = MASKED_VALUE.to_string();
            }
        }

        Ok(settings)
    }
}

impl UserSetting {
    pub async fn get(
        pool: &PgPool,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_settings WHERE user_id = $1 AND key = $2")
                .bind(user_id)
                .bind(key)
                .fetch_optional(pool)
                .await?;

        Ok(row.map(|(v,)| v))
    }

    pub async fn set(
        pool: &PgPool,
        user_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UserSetting>(
            r#"
            SELECT id, user_id, key, value, updated_at
            FROM user_settings
            WHERE user_id = $1
            ORDER BY key
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_has_unique_keys() {
        let mut keys: Vec<&str> = DEFAULT_SETTINGS.iter().map(|d| d.key).collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }

    #[test]
    fn test_default_catalog_value_types() {
        for def in DEFAULT_SETTINGS {
            assert!(
                matches!(
                    def.value_type,
                    "string" | "int" | "float" | "boolean" | "password" | "json"
                ),
                "unexpected value_type {} for {}",
                def.value_type,
                def.key
            );
        }
    }

    #[test]
    fn test_secrets_are_password_typed() {
        for key in ["openai_api_key", "evolution_apikey", "smtp_password"] {
            let def = DEFAULT_SETTINGS.iter().find(|d| d.key == key).unwrap();
            assert_eq!(def.value_type, "password");
        }
    }
}
