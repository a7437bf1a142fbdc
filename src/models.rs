//! Core data model: endpoints, events, deliveries and wire payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A registered webhook delivery target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub url: String,
    /// Event type names this endpoint subscribes to.
    pub event_types: Vec<String>,
    /// AES-256-GCM encrypted signing secret (base64).
    pub secret_encrypted: String,
    /// Inactive endpoints are excluded from fan-out.
    pub active: bool,
    /// Set while the circuit is open; cleared on reset.
    pub disabled_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last successful delivery to this endpoint.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Consecutive failed deliveries; reset to 0 on any success.
    pub consecutive_failures: i32,
    /// Failure count at which the circuit breaker opens.
    pub max_failures: i32,
}

impl Endpoint {
    /// Whether the endpoint subscribes to the given event type.
    #[must_use]
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|et| et == event_type)
    }
}

/// Registration request for a new endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterEndpoint {
    pub owner_id: Uuid,
    pub url: String,
    pub event_types: Vec<String>,
    /// Signing secret; generated when absent.
    pub secret: Option<String>,
}

/// Registration response. The plaintext secret is returned exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredEndpoint {
    pub endpoint: Endpoint,
    pub secret: String,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable fact published by a collaborator feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub owner_id: Uuid,
    /// Opaque structured payload; never inspected by the engine.
    pub data: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Message shape carried on the application event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: Uuid,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Delivery lifecycle states.
///
/// `Delivered` is terminal. `Failed` is terminal once attempts are
/// exhausted; a failed attempt with attempts remaining goes to
/// `Retrying` and back to `Pending` when its retry time is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivering" => Some(Self::Delivering),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }

    /// Whether the status admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// One attempt lineage of sending one event to one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    /// Target URL captured at creation; later endpoint mutation does
    /// not redirect an in-flight delivery.
    pub url: String,
    /// Serialized request body, fixed at creation.
    pub payload: String,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_code: Option<i16>,
    pub response_body: Option<String>,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// JSON body POSTed to endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: EventBody,
    pub webhook: WebhookRef,
    pub timestamp: DateTime<Utc>,
}

/// Event portion of the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBody {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Receiving endpoint portion of the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRef {
    pub id: Uuid,
    pub url: String,
}

impl WebhookPayload {
    /// Build the wire payload for one (event, endpoint) pair.
    #[must_use]
    pub fn build(event: &Event, endpoint: &Endpoint) -> Self {
        Self {
            event: EventBody {
                id: event.id,
                event_type: event.event_type.clone(),
                data: event.data.clone(),
                user_id: event.owner_id,
                timestamp: event.timestamp,
                source: event.source.clone(),
                metadata: event.metadata.clone(),
            },
            webhook: WebhookRef {
                id: endpoint.id,
                url: endpoint.url.clone(),
            },
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Per-endpoint delivery statistics within the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStats {
    pub endpoint_id: Uuid,
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
    /// delivered / (delivered + failed); 1.0 with no completed deliveries.
    pub success_rate: f64,
    pub circuit_open: bool,
    pub consecutive_failures: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Endpoint enriched with its delivery statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointWithStats {
    pub endpoint: Endpoint,
    pub stats: EndpointStats,
}
