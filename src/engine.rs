//! Engine facade wiring the delivery pipeline together.
//!
//! `WebhookEngine` owns the store and all services, exposes the
//! administrative surface (registration, stats, catalog), the event
//! emission entry points, and deterministic single-step drivers used
//! by callers that manage their own scheduling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::{self, CatalogEntry};
use crate::circuit_breaker::{CircuitBreakerMonitor, CircuitScanReport};
use crate::config::WebhookConfig;
use crate::error::WebhookResult;
use crate::models::{
    Delivery, Endpoint, EndpointStats, EndpointWithStats, Event, RegisterEndpoint,
    RegisteredEndpoint,
};
use crate::services::batch::{BatchOptimizer, TuningCache};
use crate::services::delivery::DeliveryDispatcher;
use crate::services::emitter::{EventEmitter, EventObserver, EventPublisher};
use crate::services::registry::EndpointRegistry;
use crate::services::stats::StatsService;
use crate::store::WebhookStore;
use crate::worker::WebhookWorker;

/// Capacity of the internal event bus.
const BUS_CAPACITY: usize = 256;

pub struct WebhookEngine {
    config: WebhookConfig,
    store: Arc<WebhookStore>,
    registry: EndpointRegistry,
    emitter: Arc<EventEmitter>,
    batch: Arc<BatchOptimizer>,
    monitor: Arc<CircuitBreakerMonitor>,
    stats: StatsService,
    publisher: EventPublisher,
}

impl WebhookEngine {
    /// Wire the full engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> WebhookResult<Self> {
        let store = Arc::new(WebhookStore::new());
        let tuning = Arc::new(TuningCache::new(config.tuning_ttl_secs));

        let dispatcher = Arc::new(DeliveryDispatcher::new(
            Arc::clone(&store),
            &config,
            Arc::clone(&tuning),
        )?);
        let batch = Arc::new(BatchOptimizer::new(
            Arc::clone(&store),
            dispatcher,
            tuning,
            &config,
        ));

        let registry = EndpointRegistry::new(Arc::clone(&store), &config);
        let emitter = Arc::new(EventEmitter::new(Arc::clone(&store), config.max_attempts));
        let stats = StatsService::new(Arc::clone(&store));

        // The worker holds the initial receiver when started; feature
        // modules clone the publisher.
        let (publisher, _initial_rx) = EventPublisher::new(BUS_CAPACITY);
        let monitor = Arc::new(CircuitBreakerMonitor::new(
            Arc::clone(&store),
            publisher.clone(),
            &config,
        ));

        Ok(Self {
            config,
            store,
            registry,
            emitter,
            batch,
            monitor,
            stats,
            publisher,
        })
    }

    // --- Endpoint administration ---

    /// Register an endpoint. The plaintext signing secret is returned
    /// exactly once.
    pub async fn register_endpoint(
        &self,
        request: RegisterEndpoint,
    ) -> WebhookResult<RegisteredEndpoint> {
        self.registry.register(request).await
    }

    /// Remove an endpoint. Returns false when the endpoint does not
    /// exist or is not owned by `owner_id`.
    pub async fn unregister_endpoint(&self, endpoint_id: Uuid, owner_id: Uuid) -> bool {
        self.registry.unregister(endpoint_id, owner_id).await
    }

    pub async fn list_endpoints(&self, owner_id: Uuid) -> Vec<EndpointWithStats> {
        self.registry.list(owner_id).await
    }

    pub async fn endpoint_metrics(&self, endpoint_id: Uuid) -> WebhookResult<EndpointStats> {
        self.stats.endpoint_metrics(endpoint_id).await
    }

    pub async fn recent_deliveries(&self, endpoint_id: Uuid, limit: usize) -> Vec<Delivery> {
        self.stats.recent_deliveries(endpoint_id, limit).await
    }

    /// Recompute tuned dispatch parameters for all endpoints. Returns
    /// how many endpoints had enough history to tune.
    pub async fn reoptimize(&self) -> usize {
        self.batch.reoptimize_all().await
    }

    /// The catalog of known event types.
    #[must_use]
    pub fn event_catalog(&self) -> Vec<CatalogEntry> {
        catalog::event_catalog()
    }

    // --- Event emission ---

    /// Emit an event directly, fanning out deliveries to all
    /// subscribed active endpoints. Returns the event id.
    pub async fn emit(
        &self,
        event_type: &str,
        data: serde_json::Value,
        owner_id: Uuid,
        source: &str,
        metadata: Option<serde_json::Value>,
    ) -> WebhookResult<Uuid> {
        self.emitter
            .emit(event_type, data, owner_id, source, metadata)
            .await
    }

    /// A handle for feature modules to publish onto the event bus.
    #[must_use]
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Register a synchronous in-process observer, notified on every
    /// emitted event before webhook fan-out.
    pub async fn register_observer(&self, observer: Arc<dyn EventObserver>) {
        self.emitter.register_observer(observer).await;
    }

    // --- Single-step drivers ---
    //
    // These run one unit of the background schedule on the caller's
    // clock. The spawned worker uses the same paths on timers.

    /// Dispatch everything currently ready, in concurrent batches.
    /// Returns the number of deliveries attempted.
    pub async fn run_dispatch_cycle(&self) -> usize {
        self.batch.drain_ready().await
    }

    /// Promote retries due at `now` back onto the dispatch queue.
    pub async fn run_retry_scan_at(&self, now: DateTime<Utc>) -> usize {
        self.store.promote_due_retries(now).await
    }

    pub async fn run_retry_scan(&self) -> usize {
        self.run_retry_scan_at(Utc::now()).await
    }

    /// Run one circuit breaker scan at `now`.
    pub async fn run_circuit_scan_at(&self, now: DateTime<Utc>) -> CircuitScanReport {
        self.monitor.scan_at(now).await
    }

    /// Purge events and deliveries past their retention windows.
    pub async fn run_purge_at(&self, now: DateTime<Utc>) -> (usize, usize) {
        self.store
            .purge_expired(
                now,
                chrono::Duration::hours(self.config.event_retention_hours),
                chrono::Duration::days(self.config.delivery_retention_days),
            )
            .await
    }

    // --- Background worker ---

    /// Spawn the supervised background worker. A panicking worker loop
    /// is logged and restarted; the returned handle can request
    /// shutdown, and the join handle resolves once the worker stops.
    pub fn start_workers(&self) -> (Arc<WebhookWorker>, JoinHandle<()>) {
        let worker = Arc::new(WebhookWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.emitter),
            Arc::clone(&self.batch),
            Arc::clone(&self.monitor),
            &self.config,
        ));

        let supervisor = {
            let worker = Arc::clone(&worker);
            let publisher = self.publisher.clone();
            tokio::spawn(async move {
                loop {
                    let bus_rx = publisher.subscribe();
                    let run = {
                        let worker = Arc::clone(&worker);
                        tokio::spawn(async move { worker.run(bus_rx).await })
                    };
                    match run.await {
                        Ok(()) => break,
                        Err(e) => {
                            if worker.is_shutdown() {
                                break;
                            }
                            tracing::error!(
                                target: "webhook_worker",
                                error = %e,
                                "Worker loop crashed; restarting"
                            );
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            })
        };
        (worker, supervisor)
    }

    // --- Introspection ---

    pub async fn endpoint(&self, endpoint_id: Uuid) -> Option<Endpoint> {
        self.store.get_endpoint(endpoint_id).await
    }

    pub async fn event(&self, event_id: Uuid) -> Option<Event> {
        self.store.get_event(event_id).await
    }

    pub async fn delivery(&self, delivery_id: Uuid) -> Option<Delivery> {
        self.store.get_delivery(delivery_id).await
    }

    pub async fn deliveries_for_event(&self, event_id: Uuid) -> Vec<Delivery> {
        self.store.deliveries_for_event(event_id).await
    }

    /// Number of deliveries waiting in the dispatch queue.
    pub async fn queue_len(&self) -> usize {
        self.store.queue_len().await
    }

    #[must_use]
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}
