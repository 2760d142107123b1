/// Organization model and database operations
///
/// Organizations are the top-level entity for multi-tenant isolation. Every
/// user, invoice, setting, and webhook endpoint belongs to exactly one
/// organization.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    /// Unique organization ID (UUID v4)
    pub id: Uuid,

    /// Company or account name
    pub name: String,

    /// Fiscal tax ID (RNC for Dominican companies)
    pub tax_id: Option<String>,

    /// Billing plan, used for rate limiting tiers
    pub plan: String,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a new organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    pub tax_id: Option<String>,
}

impl Organization {
    pub async fn create(pool: &PgPool, data: CreateOrganization) -> Result<Self, sqlx::Error> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (name, tax_id)
            VALUES ($1, $2)
            RETURNING id, name, tax_id, plan, created_at
            "#,
        )
        .bind(data.name)
        .bind(data.tax_id)
        .fetch_one(pool)
        .await?;

        Ok(org)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, tax_id, plan, created_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(org)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            SELECT id, name, tax_id, plan, created_at
            FROM organizations
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;

        Ok(org)
    }

    /// Updates the organization name and tax ID.
    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        name: &str,
        tax_id: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let org = sqlx::query_as::<_, Organization>(
            r#"
            UPDATE organizations
            SET name = $2, tax_id = $3
            WHERE id = $1
            RETURNING id, name, tax_id, plan, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(tax_id)
        .fetch_optional(pool)
        .await?;

        Ok(org)
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM organizations")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }
}
