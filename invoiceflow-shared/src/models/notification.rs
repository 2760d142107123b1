/// Persistent notifications shown in the dashboard inbox
///
/// Notifications are created when pipeline events fire (extraction finished,
/// WhatsApp image received, cost alerts) so users who were not connected over
/// WebSocket still see them later.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub organization_id: Uuid,

    /// Severity: info, success, warning, error
    pub kind: String,

    pub title: String,
    pub message: String,

    /// Structured event payload, if any
    pub data: Option<JsonValue>,

    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a notification
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub organization_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Option<JsonValue>,
}

impl Notification {
    pub async fn create(pool: &PgPool, data: CreateNotification) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (organization_id, kind, title, message, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, kind, title, message, data, read, created_at
            "#,
        )
        .bind(data.organization_id)
        .bind(data.kind)
        .bind(data.title)
        .bind(data.message)
        .bind(data.data)
        .fetch_one(pool)
        .await
    }

    /// Lists notifications for an organization, newest first.
    pub async fn list(
        pool: &PgPool,
        organization_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = if unread_only {
            r#"
            SELECT id, organization_id, kind, title, message, data, read, created_at
            FROM notifications
            WHERE organization_id = $1 AND read = FALSE
            ORDER BY created_at DESC
            LIMIT $2
            "#
        } else {
            r#"
            SELECT id, organization_id, kind, title, message, data, read, created_at
            FROM notifications
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        };

        sqlx::query_as::<_, Notification>(query)
            .bind(organization_id)
            .bind(limit.clamp(1, 200))
            .fetch_all(pool)
            .await
    }

    pub async fn unread_count(pool: &PgPool, organization_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE organization_id = $1 AND read = FALSE",
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    pub async fn mark_read(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND organization_id = $2",
        )
        .bind(id)
        .bind(organization_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(pool: &PgPool, organization_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE organization_id = $1 AND read = FALSE",
        )
        .bind(organization_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM notifications WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(organization_id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
