//! Background worker driving the delivery pipeline.
//!
//! One worker task multiplexes the periodic duties of the engine:
//! batched dispatch of ready deliveries, promotion of due retries,
//! circuit breaker scans, retention purges, and consumption of bus
//! messages from feature modules. Graceful shutdown stops the loop at
//! the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreakerMonitor;
use crate::config::WebhookConfig;
use crate::models::BusMessage;
use crate::services::batch::BatchOptimizer;
use crate::services::emitter::EventEmitter;
use crate::store::WebhookStore;

/// How often expired events and deliveries are purged.
const PURGE_INTERVAL_SECS: u64 = 3600;

pub struct WebhookWorker {
    store: Arc<WebhookStore>,
    emitter: Arc<EventEmitter>,
    batch: Arc<BatchOptimizer>,
    monitor: Arc<CircuitBreakerMonitor>,
    retry_poll_interval: Duration,
    circuit_scan_interval: Duration,
    event_retention: chrono::Duration,
    delivery_retention: chrono::Duration,
    shutdown: Arc<AtomicBool>,
}

impl WebhookWorker {
    #[must_use]
    pub fn new(
        store: Arc<WebhookStore>,
        emitter: Arc<EventEmitter>,
        batch: Arc<BatchOptimizer>,
        monitor: Arc<CircuitBreakerMonitor>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            batch,
            monitor,
            retry_poll_interval: Duration::from_millis(config.retry_poll_interval_ms),
            circuit_scan_interval: Duration::from_secs(config.circuit_scan_interval_secs),
            event_retention: chrono::Duration::hours(config.event_retention_hours),
            delivery_retention: chrono::Duration::days(config.delivery_retention_days),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the worker until shutdown is requested.
    ///
    /// `bus_rx` carries messages published by feature modules; each one
    /// is translated into a webhook event.
    pub async fn run(&self, mut bus_rx: broadcast::Receiver<BusMessage>) {
        info!(
            target: "webhook_worker",
            retry_poll_ms = self.retry_poll_interval.as_millis() as u64,
            circuit_scan_secs = self.circuit_scan_interval.as_secs(),
            "Starting webhook delivery worker"
        );

        let mut retry_interval = interval(self.retry_poll_interval);
        let mut circuit_interval = interval(self.circuit_scan_interval);
        let mut purge_interval = interval(Duration::from_secs(PURGE_INTERVAL_SECS));

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(target: "webhook_worker", "Shutdown requested, stopping worker");
                break;
            }

            tokio::select! {
                _ = retry_interval.tick() => {
                    self.promote_and_dispatch().await;
                }
                _ = circuit_interval.tick() => {
                    let report = self.monitor.scan().await;
                    if !report.opened.is_empty() || !report.reset.is_empty() {
                        info!(
                            target: "circuit_breaker",
                            opened = report.opened.len(),
                            reset = report.reset.len(),
                            "Circuit breaker scan complete"
                        );
                    }
                }
                _ = purge_interval.tick() => {
                    self.purge_expired().await;
                }
                msg = bus_rx.recv() => {
                    self.handle_bus_message(msg).await;
                }
            }
        }
    }

    /// Request graceful shutdown. Takes effect at the next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    async fn promote_and_dispatch(&self) {
        let promoted = self.store.promote_due_retries(Utc::now()).await;
        if promoted > 0 {
            debug!(
                target: "webhook_delivery",
                count = promoted,
                "Promoted due retries to the dispatch queue"
            );
        }
        self.batch.run_cycle().await;
    }

    async fn purge_expired(&self) {
        let (events, deliveries) = self
            .store
            .purge_expired(Utc::now(), self.event_retention, self.delivery_retention)
            .await;
        if events > 0 || deliveries > 0 {
            info!(
                target: "webhook_worker",
                events = events,
                deliveries = deliveries,
                "Purged expired events and deliveries"
            );
        }
    }

    async fn handle_bus_message(&self, msg: Result<BusMessage, broadcast::error::RecvError>) {
        match msg {
            Ok(msg) => {
                let event_type = msg.event_type.clone();
                if let Err(e) = self.emitter.emit_bus_message(msg).await {
                    warn!(
                        target: "webhook_worker",
                        event_type = %event_type,
                        error = %e,
                        "Failed to process bus message"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    target: "webhook_worker",
                    skipped = skipped,
                    "Bus listener lagged, messages were dropped"
                );
            }
            Err(broadcast::error::RecvError::Closed) => {
                // All publishers gone; events can still be emitted
                // directly through the engine.
                debug!(target: "webhook_worker", "Event bus closed");
                self.shutdown();
            }
        }
    }
}
