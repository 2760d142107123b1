/// WebSocket notification hub
///
/// Org-scoped fan-out of realtime events over tokio broadcast channels.
/// Each connected client subscribes to its organization's channel; events
/// are serialized once and every subscriber gets the same frame. Events
/// that matter beyond the open session are also persisted as rows in
/// `notifications` before broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use invoiceflow_shared::models::notification::{CreateNotification, Notification};

/// Buffered frames per organization channel before slow clients lag
const CHANNEL_CAPACITY: usize = 64;

/// Heartbeat interval for connected clients
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Realtime event types pushed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEvent {
    InvoiceUploaded,
    ProcessingStarted,
    ProcessingComplete,
    WhatsappImageReceived,
    CostAlert,
    StatisticsUpdate,
    Heartbeat,
    ConnectionEstablished,
}

impl WsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsEvent::InvoiceUploaded => "invoice_uploaded",
            WsEvent::ProcessingStarted => "processing_started",
            WsEvent::ProcessingComplete => "processing_complete",
            WsEvent::WhatsappImageReceived => "whatsapp_image_received",
            WsEvent::CostAlert => "cost_alert",
            WsEvent::StatisticsUpdate => "statistics_update",
            WsEvent::Heartbeat => "heartbeat",
            WsEvent::ConnectionEstablished => "connection_established",
        }
    }

    /// Transient events exist only for open sessions; the rest are written
    /// to the notifications table so users see them after reconnecting.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            WsEvent::Heartbeat
                | WsEvent::ConnectionEstablished
                | WsEvent::ProcessingStarted
                | WsEvent::StatisticsUpdate
        )
    }

    /// Notification kind and Spanish title for persisted events.
    fn notification_meta(&self) -> (&'static str, &'static str) {
        match self {
            WsEvent::InvoiceUploaded => ("info", "Factura Recibida"),
            WsEvent::ProcessingComplete => ("success", "Procesamiento Completado"),
            WsEvent::WhatsappImageReceived => ("info", "Imagen de WhatsApp Recibida"),
            WsEvent::CostAlert => ("warning", "Alerta de Presupuesto de IA"),
            _ => ("info", "Notificación"),
        }
    }
}

/// The fan-out hub. Cheap to clone; shared via AppState.
#[derive(Clone)]
pub struct Hub {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<String>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribes to an organization's event stream, creating the channel
    /// on first use.
    pub async fn subscribe(&self, organization_id: Uuid) -> broadcast::Receiver<String> {
        let mut channels = self.channels.write().await;
        channels
            .entry(organization_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Sends an event frame to all subscribers of one organization.
    /// A missing channel or zero receivers is not an error.
    pub async fn broadcast(&self, organization_id: Uuid, event: WsEvent, data: JsonValue) {
        let frame = json!({
            "event": event.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        })
        .to_string();

        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&organization_id) {
            let receivers = sender.send(frame).unwrap_or(0);
            debug!(
                organization_id = %organization_id,
                event = event.as_str(),
                receivers,
                "broadcast event"
            );
        }
    }

    /// Persists the event as a notification, then broadcasts it. Transient
    /// events skip the database write.
    pub async fn notify(
        &self,
        pool: &PgPool,
        organization_id: Uuid,
        event: WsEvent,
        message: String,
        data: JsonValue,
    ) {
        if !event.is_transient() {
            let (kind, title) = event.notification_meta();
            let result = Notification::create(
                pool,
                CreateNotification {
                    organization_id,
                    kind: kind.to_string(),
                    title: title.to_string(),
                    message,
                    data: Some(data.clone()),
                },
            )
            .await;

            if let Err(e) = result {
                warn!(error = %e, event = event.as_str(), "failed to persist notification");
            }
        }

        self.broadcast(organization_id, event, data).await;
    }

    /// Drops channels that no longer have any subscribers.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Heartbeats every active channel. Run from a spawned interval task.
    pub async fn heartbeat(&self) {
        let frame = json!({
            "event": WsEvent::Heartbeat.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": {},
        })
        .to_string();

        let channels = self.channels.read().await;
        for sender in channels.values() {
            let _ = sender.send(frame.clone());
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the periodic heartbeat and channel pruning task.
pub fn spawn_heartbeat_task(hub: Hub) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            hub.prune().await;
            hub.heartbeat().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(WsEvent::InvoiceUploaded.as_str(), "invoice_uploaded");
        assert_eq!(WsEvent::ProcessingComplete.as_str(), "processing_complete");
        assert_eq!(WsEvent::CostAlert.as_str(), "cost_alert");
    }

    #[test]
    fn test_transient_events_not_persisted() {
        assert!(WsEvent::Heartbeat.is_transient());
        assert!(WsEvent::ConnectionEstablished.is_transient());
        assert!(WsEvent::ProcessingStarted.is_transient());
        assert!(!WsEvent::InvoiceUploaded.is_transient());
        assert!(!WsEvent::CostAlert.is_transient());
    }

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let hub = Hub::new();
        let org = Uuid::new_v4();

        let mut rx = hub.subscribe(org).await;
        hub.broadcast(org, WsEvent::StatisticsUpdate, json!({"total": 5}))
            .await;

        let frame = rx.recv().await.unwrap();
        let parsed: JsonValue = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "statistics_update");
        assert_eq!(parsed["data"]["total"], 5);
    }

    #[tokio::test]
    async fn test_broadcast_scoped_to_org() {
        let hub = Hub::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        let mut rx_a = hub.subscribe(org_a).await;
        let _rx_b = hub.subscribe(org_b).await;

        hub.broadcast(org_b, WsEvent::Heartbeat, json!({})).await;

        // org A saw nothing
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prune_removes_dead_channels() {
        let hub = Hub::new();
        let org = Uuid::new_v4();

        drop(hub.subscribe(org).await);
        hub.prune().await;

        assert!(hub.channels.read().await.is_empty());
    }
}
