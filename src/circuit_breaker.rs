//! Circuit breaker for persistently failing endpoints.
//!
//! A periodic scan examines endpoint failure counters. An active
//! endpoint whose consecutive failure count has reached its threshold
//! is disabled for a cooldown period; a disabled endpoint whose
//! cooldown has elapsed is re-enabled with its counter reset. Both
//! transitions publish a system notification on the event bus.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::services::emitter::{circuit_notification, EventPublisher};
use crate::store::WebhookStore;

/// Outcome of one circuit breaker scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CircuitScanReport {
    /// Endpoints disabled during this scan.
    pub opened: Vec<Uuid>,
    /// Endpoints re-enabled during this scan.
    pub reset: Vec<Uuid>,
}

pub struct CircuitBreakerMonitor {
    store: Arc<WebhookStore>,
    publisher: EventPublisher,
    cooldown: Duration,
}

impl CircuitBreakerMonitor {
    #[must_use]
    pub fn new(store: Arc<WebhookStore>, publisher: EventPublisher, config: &WebhookConfig) -> Self {
        Self {
            store,
            publisher,
            cooldown: Duration::seconds(config.circuit_cooldown_secs),
        }
    }

    /// Run one scan using the current clock.
    pub async fn scan(&self) -> CircuitScanReport {
        self.scan_at(Utc::now()).await
    }

    /// Run one scan at the given instant. Separated from the wall clock
    /// so cooldown expiry is testable directly.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> CircuitScanReport {
        let mut report = CircuitScanReport::default();

        for endpoint in self.store.all_endpoints().await {
            if endpoint.active {
                if endpoint.consecutive_failures >= endpoint.max_failures {
                    let until = now + self.cooldown;
                    if self.store.open_circuit(endpoint.id, until).await {
                        tracing::warn!(
                            target: "circuit_breaker",
                            endpoint_id = %endpoint.id,
                            url = %endpoint.url,
                            consecutive_failures = endpoint.consecutive_failures,
                            disabled_until = %until,
                            "Circuit opened for failing endpoint"
                        );
                        self.publisher.publish(circuit_notification(
                            "system.webhook_circuit_opened",
                            endpoint.owner_id,
                            endpoint.id,
                            &endpoint.url,
                            endpoint.consecutive_failures,
                        ));
                        report.opened.push(endpoint.id);
                    }
                }
            } else if let Some(until) = endpoint.disabled_until {
                if until <= now && self.store.close_circuit(endpoint.id).await {
                    tracing::info!(
                        target: "circuit_breaker",
                        endpoint_id = %endpoint.id,
                        url = %endpoint.url,
                        "Circuit reset, endpoint re-enabled"
                    );
                    self.publisher.publish(circuit_notification(
                        "system.webhook_circuit_closed",
                        endpoint.owner_id,
                        endpoint.id,
                        &endpoint.url,
                        0,
                    ));
                    report.reset.push(endpoint.id);
                }
            }
        }

        report
    }
}
