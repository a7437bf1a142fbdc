//! Event emission and delivery fan-out.
//!
//! `emit` is the single integration point feature modules use to
//! trigger notifications: it persists the event, invokes in-process
//! observers synchronously, and creates one pending delivery per
//! active subscribed endpoint. HTTP dispatch itself is always
//! asynchronous, performed by the workers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::WebhookResult;
use crate::models::{BusMessage, Delivery, DeliveryStatus, Event, WebhookPayload};
use crate::store::WebhookStore;
use crate::validation;

/// In-process observer invoked synchronously on every emitted event.
///
/// Observer failures are isolated: one failing observer neither blocks
/// the others nor prevents fan-out.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Emits events and fans them out into pending deliveries.
pub struct EventEmitter {
    store: Arc<WebhookStore>,
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
    max_attempts: i32,
}

impl EventEmitter {
    #[must_use]
    pub fn new(store: Arc<WebhookStore>, max_attempts: i32) -> Self {
        Self {
            store,
            observers: RwLock::new(Vec::new()),
            max_attempts,
        }
    }

    /// Register an in-process observer. Intended for startup wiring.
    pub async fn register_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Emit an event: persist it, notify local observers, and create
    /// one pending delivery per active subscribed endpoint.
    ///
    /// Returns the event id.
    pub async fn emit(
        &self,
        event_type: &str,
        data: serde_json::Value,
        owner_id: Uuid,
        source: &str,
        metadata: Option<serde_json::Value>,
    ) -> WebhookResult<Uuid> {
        validation::validate_event_type(event_type)?;

        let event = Event {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            owner_id,
            data,
            source: source.to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        let event_id = event.id;
        self.store.insert_event(event.clone()).await;

        self.notify_observers(&event).await;

        let endpoints = self.store.subscribed_endpoints(owner_id, event_type).await;
        if endpoints.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event_id,
                event_type = %event_type,
                "No active endpoints subscribe to event type"
            );
            return Ok(event_id);
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event_id,
            event_type = %event_type,
            owner_id = %owner_id,
            endpoint_count = endpoints.len(),
            "Fanning out event to subscribed endpoints"
        );

        for endpoint in &endpoints {
            let payload = WebhookPayload::build(&event, endpoint);
            let body = match serde_json::to_string(&payload) {
                Ok(b) => b,
                Err(e) => {
                    // Serialization failure affects only this endpoint's
                    // delivery; the rest of the fan-out proceeds.
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event_id,
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Failed to serialize webhook payload"
                    );
                    continue;
                }
            };

            let delivery = Delivery {
                id: Uuid::new_v4(),
                endpoint_id: endpoint.id,
                event_id,
                event_type: event.event_type.clone(),
                url: endpoint.url.clone(),
                payload: body,
                status: DeliveryStatus::Pending,
                attempts: 0,
                max_attempts: self.max_attempts,
                created_at: Utc::now(),
                last_attempt_at: None,
                next_retry_at: None,
                response_code: None,
                response_body: None,
                last_error: None,
            };
            self.store.insert_delivery(delivery).await;
        }

        Ok(event_id)
    }

    /// Translate a bus message into an emission.
    pub async fn emit_bus_message(&self, msg: BusMessage) -> WebhookResult<Uuid> {
        self.emit(
            &msg.event_type,
            msg.data,
            msg.user_id,
            &msg.source,
            msg.metadata,
        )
        .await
    }

    async fn notify_observers(&self, event: &Event) {
        let observers: Vec<Arc<dyn EventObserver>> =
            self.observers.read().await.iter().cloned().collect();
        for observer in observers {
            if let Err(e) = observer.on_event(event).await {
                tracing::warn!(
                    target: "webhook_delivery",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Event observer failed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// Publisher side of the application event bus (tokio broadcast).
///
/// Feature modules publish `BusMessage`s; the engine's bus listener
/// translates each into an `emit` call.
#[derive(Clone)]
pub struct EventPublisher {
    sender: tokio::sync::broadcast::Sender<BusMessage>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<BusMessage>) {
        let (sender, receiver) = tokio::sync::broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish a message. Fire-and-forget: with no live subscriber the
    /// message is dropped and logged.
    pub fn publish(&self, msg: BusMessage) {
        if self.sender.send(msg).is_err() {
            tracing::debug!(
                target: "webhook_delivery",
                "No active bus subscribers to receive message"
            );
        }
    }

    /// Get a new receiver for the bus.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

/// Convenience for publishing a circuit trip/reset notification.
pub fn circuit_notification(
    event_type: &str,
    owner_id: Uuid,
    endpoint_id: Uuid,
    url: &str,
    consecutive_failures: i32,
) -> BusMessage {
    BusMessage {
        event_type: event_type.to_string(),
        user_id: owner_id,
        data: serde_json::json!({
            "endpoint_id": endpoint_id,
            "url": url,
            "consecutive_failures": consecutive_failures,
        }),
        metadata: None,
        timestamp: Utc::now(),
        source: "webhook-engine".to_string(),
    }
}
