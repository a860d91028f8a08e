use std::sync::Arc;

use tokio::sync::broadcast;

use tempo_core::events::{ChangeEvent, NotificationEnvelope};

use crate::client::ClientRegistry;

/// The single broadcast topic every mutation notification goes out on.
pub const TOPIC_CHANGES: &str = "changes";

/// Reads committed change events off the engine's broadcast channel,
/// converts them to wire envelopes, and fans them out to subscribed clients.
/// Strictly fire-and-forget: a lagged receiver or a slow client drops
/// messages; nothing here can fail or delay the originating mutation.
pub struct NotificationBus {
    registry: Arc<ClientRegistry>,
}

impl NotificationBus {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<ChangeEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = serialize_notification(&event) {
                            registry.broadcast_to_topic(TOPIC_CHANGES, &json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Notification bus lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Notification bus channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create a bus wired to a broadcast channel.
pub fn create_bus(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<ChangeEvent>,
) -> tokio::task::JoinHandle<()> {
    let bus = NotificationBus::new(registry);
    bus.start(rx)
}

/// Serialize a change event to its wire envelope.
pub fn serialize_notification(event: &ChangeEvent) -> Option<String> {
    let envelope = NotificationEnvelope::from(event);
    serde_json::to_string(&envelope).ok()
}
