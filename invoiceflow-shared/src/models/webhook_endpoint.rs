/// Webhook endpoint model and database operations
///
/// Organizations register HTTP endpoints to receive pipeline events. Each
/// endpoint gets a server-generated secret; deliveries carry an HMAC-SHA256
/// signature of the payload in the `X-InvoiceFlow-Signature` header so
/// recipients can verify authenticity.
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub organization_id: Uuid,

    /// Delivery URL (http:// or https://)
    pub url: String,

    pub description: Option<String>,

    /// Event names to deliver. "*" subscribes to everything.
    pub events: Vec<String>,

    /// Hex-encoded HMAC key
    #[serde(skip_serializing)] // Never expose the secret in API responses
    pub secret: String,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a webhook endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhookEndpoint {
    pub url: String,
    pub description: Option<String>,
    #[serde(default = "default_events")]
    pub events: Vec<String>,
}

fn default_events() -> Vec<String> {
    vec!["*".to_string()]
}

/// Input for updating a webhook endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWebhookEndpoint {
    pub url: Option<String>,
    pub description: Option<String>,
    pub events: Option<Vec<String>>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub regenerate_secret: bool,
}

impl WebhookEndpoint {
    /// Generates a random 32-byte secret, hex encoded.
    fn generate_secret() -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        hex::encode(bytes)
    }

    /// HMAC-SHA256 signature of a payload, hex encoded. Sent in the
    /// `X-InvoiceFlow-Signature` header on every delivery.
    pub fn sign_payload(&self, payload: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Whether this endpoint subscribes to the given event name.
    pub fn matches_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event || e == "*")
    }

    pub async fn create(
        pool: &PgPool,
        organization_id: Uuid,
        data: CreateWebhookEndpoint,
    ) -> Result<Self, sqlx::Error> {
        let secret = Self::generate_secret();

        sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            INSERT INTO webhook_endpoints (organization_id, url, description, events, secret)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, organization_id, url, description, events, secret,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(organization_id)
        .bind(data.url)
        .bind(data.description)
        .bind(&data.events)
        .bind(secret)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id_and_org(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            SELECT id, organization_id, url, description, events, secret,
                   is_active, created_at, updated_at
            FROM webhook_endpoints
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_organization(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            SELECT id, organization_id, url, description, events, secret,
                   is_active, created_at, updated_at
            FROM webhook_endpoints
            WHERE organization_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }

    /// Active endpoints subscribed to `event` (directly or via "*").
    pub async fn list_for_event(
        pool: &PgPool,
        organization_id: Uuid,
        event: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEndpoint>(
            r#"
            SELECT id, organization_id, url, description, events, secret,
                   is_active, created_at, updated_at
            FROM webhook_endpoints
            WHERE organization_id = $1
              AND is_active = TRUE
              AND ($2 = ANY(events) OR '*' = ANY(events))
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .bind(event)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
        data: UpdateWebhookEndpoint,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE webhook_endpoints SET updated_at = NOW()");
        let mut bind_count = 2;

        if data.url.is_some() {
            bind_count += 1;
            query.push_str(&format!(", url = ${bind_count}"));
        }
        if data.description.is_some() {
            bind_count += 1;
            query.push_str(&format!(", description = ${bind_count}"));
        }
        if data.events.is_some() {
            bind_count += 1;
            query.push_str(&format!(", events = ${bind_count}"));
        }
        if data.is_active.is_some() {
            bind_count += 1;
            query.push_str(&format!(", is_active = ${bind_count}"));
        }
        if data.regenerate_secret {
            bind_count += 1;
            query.push_str(&format!(", secret = ${bind_count}"));
        }

        query.push_str(
            " WHERE id = $1 AND organization_id = $2 \
             RETURNING id, organization_id, url, description, events, secret, \
             is_active, created_at, updated_at",
        );

        let mut q = sqlx::query_as::<_, WebhookEndpoint>(&query)
            .bind(id)
            .bind(organization_id);

        if let Some(url) = data.url {
            q = q.bind(url);
        }
        if let Some(description) = data.description {
            q = q.bind(description);
        }
        if let Some(events) = data.events {
            q = q.bind(events);
        }
        if let Some(is_active) = data.is_active {
            q = q.bind(is_active);
        }
        if data.regenerate_secret {
            q = q.bind(Self::generate_secret());
        }

        q.fetch_optional(pool).await
    }

    pub async fn delete(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM webhook_endpoints WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(organization_id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(events: Vec<&str>) -> WebhookEndpoint {
        WebhookEndpoint {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            url: "https://example.com/hooks".to_string(),
            description: None,
            events: events.into_iter().map(String::from).collect(),
            secret: "aabbccdd".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sign_payload_deterministic() {
        let ep = endpoint(vec!["invoice.processed"]);

        let sig1 = ep.sign_payload(b"payload");
        let sig2 = ep.sign_payload(b"payload");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64); // SHA-256 hex

        let sig3 = ep.sign_payload(b"other payload");
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn test_matches_event() {
        let ep = endpoint(vec!["invoice.processed"]);
        assert!(ep.matches_event("invoice.processed"));
        assert!(!ep.matches_event("invoice.uploaded"));

        let wildcard = endpoint(vec!["*"]);
        assert!(wildcard.matches_event("anything.at.all"));
    }

    #[test]
    fn test_generate_secret_is_random_hex() {
        let s1 = WebhookEndpoint::generate_secret();
        let s2 = WebhookEndpoint::generate_secret();
        assert_eq!(s1.len(), 64);
        assert_ne!(s1, s2);
        assert!(s1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
