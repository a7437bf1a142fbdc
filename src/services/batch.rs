//! Batched concurrent dispatch and per-endpoint parameter tuning.
//!
//! Ready deliveries are collected into batches (bounded by size and a
//! fill window) and dispatched concurrently; ordering inside a batch is
//! deliberately traded for throughput. Historical success rate per
//! endpoint additionally tunes its retry backoff scale and request
//! timeout, cached for a bounded interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::models::Delivery;
use crate::services::delivery::DeliveryDispatcher;
use crate::services::stats;
use crate::store::WebhookStore;

/// Minimum completed deliveries before tuning kicks in.
const MIN_TUNING_HISTORY: u64 = 5;

/// Poll interval while waiting for a batch to fill.
const BATCH_POLL_MS: u64 = 25;

/// Tuned dispatch parameters for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunedParams {
    /// Multiplier applied to the retry backoff schedule.
    pub backoff_scale: f64,
    /// Outbound request timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
struct TunedEntry {
    params: TunedParams,
    computed_at: DateTime<Utc>,
}

/// Bounded-TTL cache of tuned parameters, shared with the dispatcher.
pub struct TuningCache {
    entries: RwLock<HashMap<Uuid, TunedEntry>>,
    ttl: Duration,
}

impl TuningCache {
    #[must_use]
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Current tuned parameters for an endpoint, if fresh.
    pub async fn get(&self, endpoint_id: Uuid) -> Option<TunedParams> {
        let entries = self.entries.read().await;
        let entry = entries.get(&endpoint_id)?;
        if Utc::now() - entry.computed_at > self.ttl {
            return None;
        }
        Some(entry.params)
    }

    pub async fn put(&self, endpoint_id: Uuid, params: TunedParams) {
        self.entries.write().await.insert(
            endpoint_id,
            TunedEntry {
                params,
                computed_at: Utc::now(),
            },
        );
    }

    pub async fn remove(&self, endpoint_id: Uuid) {
        self.entries.write().await.remove(&endpoint_id);
    }
}

/// Derive tuned parameters from a success rate.
///
/// Reliable endpoints get shorter retry delays and tighter timeouts;
/// flaky ones get longer, more conservative settings.
#[must_use]
pub fn tune_for_success_rate(success_rate: f64, default_timeout_secs: u64) -> TunedParams {
    if success_rate >= 0.95 {
        TunedParams {
            backoff_scale: 0.5,
            timeout_secs: default_timeout_secs.min(10),
        }
    } else if success_rate >= 0.8 {
        TunedParams {
            backoff_scale: 1.0,
            timeout_secs: default_timeout_secs,
        }
    } else if success_rate >= 0.5 {
        TunedParams {
            backoff_scale: 1.5,
            timeout_secs: default_timeout_secs,
        }
    } else {
        TunedParams {
            backoff_scale: 2.0,
            timeout_secs: default_timeout_secs.max(45),
        }
    }
}

/// Collects ready deliveries and dispatches them concurrently.
pub struct BatchOptimizer {
    store: Arc<WebhookStore>,
    dispatcher: Arc<DeliveryDispatcher>,
    tuning: Arc<TuningCache>,
    batch_size: usize,
    batch_window: StdDuration,
    default_timeout_secs: u64,
}

impl BatchOptimizer {
    #[must_use]
    pub fn new(
        store: Arc<WebhookStore>,
        dispatcher: Arc<DeliveryDispatcher>,
        tuning: Arc<TuningCache>,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            tuning,
            batch_size: config.batch_size,
            batch_window: StdDuration::from_millis(config.batch_window_ms),
            default_timeout_secs: config.request_timeout_secs,
        }
    }

    /// Collect up to `batch_size` ready deliveries, waiting at most the
    /// batch window for the batch to fill.
    ///
    /// Returns immediately when nothing is ready, and stops waiting as
    /// soon as the queue is drained: a lone delivery goes out without
    /// sitting through the window.
    pub async fn collect_batch(&self) -> Vec<Delivery> {
        let mut batch = self.store.claim_ready(self.batch_size).await;
        if batch.is_empty() {
            return batch;
        }

        let deadline = tokio::time::Instant::now() + self.batch_window;
        while batch.len() < self.batch_size {
            let remaining = self.batch_size - batch.len();
            batch.extend(self.store.claim_ready(remaining).await);
            if self.store.queue_len().await == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(BATCH_POLL_MS)).await;
        }
        batch
    }

    /// Dispatch a batch concurrently. A failure in one delivery never
    /// affects the others. Returns the batch size.
    pub async fn dispatch_batch(&self, batch: Vec<Delivery>) -> usize {
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        tracing::debug!(
            target: "webhook_delivery",
            batch_size = count,
            "Dispatching delivery batch"
        );

        let futures: Vec<_> = batch
            .into_iter()
            .map(|delivery| {
                let dispatcher = Arc::clone(&self.dispatcher);
                async move { dispatcher.dispatch(delivery).await }
            })
            .collect();
        futures::future::join_all(futures).await;
        count
    }

    /// One batch cycle: collect (waiting for the window) then dispatch.
    pub async fn run_cycle(&self) -> usize {
        let batch = self.collect_batch().await;
        self.dispatch_batch(batch).await
    }

    /// Drain everything currently ready without waiting on the fill
    /// window, one concurrent batch at a time. Returns the number of
    /// deliveries dispatched.
    pub async fn drain_ready(&self) -> usize {
        let mut total = 0;
        loop {
            let batch = self.store.claim_ready(self.batch_size).await;
            if batch.is_empty() {
                return total;
            }
            total += self.dispatch_batch(batch).await;
        }
    }

    /// Recompute tuned parameters for one endpoint from its history.
    ///
    /// Returns None when the endpoint is missing or has too little
    /// history to tune.
    pub async fn optimize_endpoint(&self, endpoint_id: Uuid) -> Option<TunedParams> {
        let endpoint = self.store.get_endpoint(endpoint_id).await?;
        let stats = stats::endpoint_stats(&self.store, &endpoint).await;

        if stats.delivered + stats.failed < MIN_TUNING_HISTORY {
            return None;
        }

        let params = tune_for_success_rate(stats.success_rate, self.default_timeout_secs);
        tracing::debug!(
            target: "webhook_delivery",
            endpoint_id = %endpoint_id,
            success_rate = stats.success_rate,
            backoff_scale = params.backoff_scale,
            timeout_secs = params.timeout_secs,
            "Tuned endpoint dispatch parameters"
        );
        self.tuning.put(endpoint_id, params).await;
        Some(params)
    }

    /// Recompute tuned parameters for every endpoint (administrative
    /// trigger). Returns how many endpoints were tuned.
    pub async fn reoptimize_all(&self) -> usize {
        let endpoints = self.store.all_endpoints().await;
        let mut tuned = 0;
        for endpoint in endpoints {
            if self.optimize_endpoint(endpoint.id).await.is_some() {
                tuned += 1;
            }
        }
        tuned
    }
}
