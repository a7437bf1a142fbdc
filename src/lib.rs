//! Webhook delivery engine for application event subscriptions.
//!
//! Provides endpoint registration with SSRF screening, event emission
//! with fan-out to subscribed endpoints, signed HTTP delivery with
//! HMAC-SHA256 payload signatures, scheduled retries with backoff,
//! per-endpoint circuit breaking, batched concurrent dispatch, and
//! delivery statistics.

pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod validation;
pub mod worker;

pub use catalog::WebhookEventType;
pub use config::WebhookConfig;
pub use engine::WebhookEngine;
pub use error::{WebhookError, WebhookResult};
pub use models::{
    BusMessage, Delivery, DeliveryStatus, Endpoint, EndpointStats, Event, RegisterEndpoint,
    RegisteredEndpoint, WebhookPayload,
};
pub use services::emitter::{EventObserver, EventPublisher};
pub use worker::WebhookWorker;
