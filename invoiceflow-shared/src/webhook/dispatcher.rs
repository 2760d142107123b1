/// Webhook delivery client
///
/// Fires pipeline events at every active endpoint subscribed to the event
/// (directly or via "*"). Deliveries are single-attempt with a 5 second
/// timeout; a failed delivery is logged and reported in the result, never
/// retried. Receivers that need reliability should poll the API.
///
/// Every request carries:
///
/// - `Content-Type: application/json`
/// - `User-Agent: InvoiceFlow-Webhook/1.0`
/// - `X-InvoiceFlow-Event`: the event name
/// - `X-InvoiceFlow-Signature`: hex HMAC-SHA256 of the body with the
///   endpoint secret
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::WebhookEndpoint;

const USER_AGENT: &str = "InvoiceFlow-Webhook/1.0";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Event names fired by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEvent {
    InvoiceUploaded,
    InvoiceProcessed,
    InvoiceFailed,
    AuditAlert,
    CostAlert,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::InvoiceUploaded => "invoice.uploaded",
            WebhookEvent::InvoiceProcessed => "invoice.processed",
            WebhookEvent::InvoiceFailed => "invoice.failed",
            WebhookEvent::AuditAlert => "audit.alert",
            WebhookEvent::CostAlert => "cost.alert",
        }
    }
}

/// Delivery payload envelope
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    event: &'a str,
    timestamp: String,
    data: &'a JsonValue,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub endpoint_id: Uuid,
    pub url: String,
    pub success: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { http }
    }

    /// Delivers `data` to every subscribed endpoint of the organization.
    /// Returns one result per endpoint; an empty Vec means no subscribers.
    pub async fn dispatch(
        &self,
        pool: &PgPool,
        organization_id: Uuid,
        event: WebhookEvent,
        data: &JsonValue,
    ) -> Result<Vec<DeliveryResult>, sqlx::Error> {
        let endpoints =
            WebhookEndpoint::list_for_event(pool, organization_id, event.as_str()).await?;

        let mut results = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            results.push(self.deliver(endpoint, event, data).await);
        }

        Ok(results)
    }

    async fn deliver(
        &self,
        endpoint: &WebhookEndpoint,
        event: WebhookEvent,
        data: &JsonValue,
    ) -> DeliveryResult {
        let envelope = Envelope {
            event: event.as_str(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        };

        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryResult {
                    endpoint_id: endpoint.id,
                    url: endpoint.url.clone(),
                    success: false,
                    status: None,
                    error: Some(format!("payload serialization failed: {}", e)),
                }
            }
        };

        let signature = endpoint.sign_payload(&body);

        let response = self
            .http
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("X-InvoiceFlow-Event", event.as_str())
            .header("X-InvoiceFlow-Signature", signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let success = status.is_success();
                if success {
                    info!(
                        endpoint_id = %endpoint.id,
                        event = event.as_str(),
                        status = status.as_u16(),
                        "webhook delivered"
                    );
                } else {
                    warn!(
                        endpoint_id = %endpoint.id,
                        event = event.as_str(),
                        status = status.as_u16(),
                        "webhook delivery rejected"
                    );
                }

                DeliveryResult {
                    endpoint_id: endpoint.id,
                    url: endpoint.url.clone(),
                    success,
                    status: Some(status.as_u16()),
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    endpoint_id = %endpoint.id,
                    event = event.as_str(),
                    error = %e,
                    "webhook delivery failed"
                );

                DeliveryResult {
                    endpoint_id: endpoint.id,
                    url: endpoint.url.clone(),
                    success: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(WebhookEvent::InvoiceUploaded.as_str(), "invoice.uploaded");
        assert_eq!(WebhookEvent::InvoiceProcessed.as_str(), "invoice.processed");
        assert_eq!(WebhookEvent::InvoiceFailed.as_str(), "invoice.failed");
        assert_eq!(WebhookEvent::AuditAlert.as_str(), "audit.alert");
        assert_eq!(WebhookEvent::CostAlert.as_str(), "cost.alert");
    }

    #[test]
    fn test_envelope_shape() {
        let data = serde_json::json!({"invoice_id": "abc"});
        let envelope = Envelope {
            event: "invoice.processed",
            timestamp: "2025-03-15T12:00:00Z".to_string(),
            data: &data,
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "invoice.processed");
        assert_eq!(json["data"]["invoice_id"], "abc");
        assert!(json["timestamp"].is_string());
    }
}
