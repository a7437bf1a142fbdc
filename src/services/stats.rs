//! Read-only delivery statistics.
//!
//! Computes per-endpoint counts and success rate from the delivery
//! records within the retention window. Never mutates endpoint or
//! delivery state.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{WebhookError, WebhookResult};
use crate::models::{Delivery, DeliveryStatus, Endpoint, EndpointStats};
use crate::store::WebhookStore;

/// Compute statistics for one endpoint from its delivery history.
pub async fn endpoint_stats(store: &WebhookStore, endpoint: &Endpoint) -> EndpointStats {
    let deliveries = store.deliveries_for_endpoint(endpoint.id).await;

    let mut delivered = 0u64;
    let mut failed = 0u64;
    let mut pending = 0u64;
    for d in &deliveries {
        match d.status {
            DeliveryStatus::Delivered => delivered += 1,
            DeliveryStatus::Failed => failed += 1,
            DeliveryStatus::Pending | DeliveryStatus::Delivering | DeliveryStatus::Retrying => {
                pending += 1;
            }
        }
    }

    let completed = delivered + failed;
    let success_rate = if completed == 0 {
        1.0
    } else {
        delivered as f64 / completed as f64
    };

    EndpointStats {
        endpoint_id: endpoint.id,
        total: deliveries.len() as u64,
        delivered,
        failed,
        pending,
        success_rate,
        circuit_open: !endpoint.active,
        consecutive_failures: endpoint.consecutive_failures,
        last_triggered_at: endpoint.last_triggered_at,
    }
}

/// Service wrapper for the administrative surface.
#[derive(Clone)]
pub struct StatsService {
    store: Arc<WebhookStore>,
}

impl StatsService {
    #[must_use]
    pub fn new(store: Arc<WebhookStore>) -> Self {
        Self { store }
    }

    /// Metrics for one endpoint.
    pub async fn endpoint_metrics(&self, endpoint_id: Uuid) -> WebhookResult<EndpointStats> {
        let endpoint = self
            .store
            .get_endpoint(endpoint_id)
            .await
            .ok_or(WebhookError::EndpointNotFound)?;
        Ok(endpoint_stats(&self.store, &endpoint).await)
    }

    /// Most recent deliveries for an endpoint, newest first.
    ///
    /// Delivery records outlive their endpoint, so this also serves
    /// post-mortem audit of an unregistered endpoint until retention
    /// purges the records.
    pub async fn recent_deliveries(&self, endpoint_id: Uuid, limit: usize) -> Vec<Delivery> {
        let mut deliveries = self.store.deliveries_for_endpoint(endpoint_id).await;
        deliveries.truncate(limit);
        deliveries
    }
}
