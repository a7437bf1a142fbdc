//! Shared in-memory store backing the engine.
//!
//! Holds the endpoint records, the event-type→endpoint index, the event
//! and delivery records, and the pending-delivery queue. All workers
//! communicate exclusively through this store; correctness relies on
//! the queue's atomic pop (a delivery id is handed to exactly one
//! claimant) and on records being read-modify-written by id.
//!
//! Lock discipline: at most one lock is held at a time, and never
//! across an I/O suspension point.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::{Delivery, DeliveryStatus, Endpoint, Event};

/// Shared store: endpoint/event/delivery records plus the dispatch queue.
#[derive(Default)]
pub struct WebhookStore {
    endpoints: RwLock<HashMap<Uuid, Endpoint>>,
    /// event type name -> subscribed endpoint ids
    subscriptions: RwLock<HashMap<String, HashSet<Uuid>>>,
    events: RwLock<HashMap<Uuid, Event>>,
    deliveries: RwLock<HashMap<Uuid, Delivery>>,
    /// Pending delivery ids awaiting dispatch.
    queue: Mutex<VecDeque<Uuid>>,
}

impl WebhookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// Persist an endpoint and index it under every subscribed event type.
    pub async fn insert_endpoint(&self, endpoint: Endpoint) {
        {
            let mut index = self.subscriptions.write().await;
            for et in &endpoint.event_types {
                index.entry(et.clone()).or_default().insert(endpoint.id);
            }
        }
        self.endpoints.write().await.insert(endpoint.id, endpoint);
    }

    pub async fn get_endpoint(&self, id: Uuid) -> Option<Endpoint> {
        self.endpoints.read().await.get(&id).cloned()
    }

    /// Delete an endpoint and all of its subscription index entries.
    pub async fn remove_endpoint(&self, id: Uuid) -> Option<Endpoint> {
        let removed = self.endpoints.write().await.remove(&id);
        if let Some(ref endpoint) = removed {
            let mut index = self.subscriptions.write().await;
            for et in &endpoint.event_types {
                if let Some(ids) = index.get_mut(et) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        index.remove(et);
                    }
                }
            }
        }
        removed
    }

    pub async fn list_endpoints_by_owner(&self, owner_id: Uuid) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub async fn count_endpoints_by_owner(&self, owner_id: Uuid) -> usize {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|e| e.owner_id == owner_id)
            .count()
    }

    pub async fn all_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().await.values().cloned().collect()
    }

    /// Active endpoints owned by `owner_id` subscribed to the given
    /// event type.
    pub async fn subscribed_endpoints(&self, owner_id: Uuid, event_type: &str) -> Vec<Endpoint> {
        let ids: Vec<Uuid> = {
            let index = self.subscriptions.read().await;
            match index.get(event_type) {
                Some(ids) => ids.iter().copied().collect(),
                None => return Vec::new(),
            }
        };
        let endpoints = self.endpoints.read().await;
        ids.into_iter()
            .filter_map(|id| endpoints.get(&id))
            .filter(|e| e.active && e.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Record a successful delivery on the endpoint: failure counter
    /// resets to zero and the last-triggered timestamp advances.
    pub async fn record_endpoint_success(&self, id: Uuid) {
        if let Some(endpoint) = self.endpoints.write().await.get_mut(&id) {
            endpoint.consecutive_failures = 0;
            endpoint.last_triggered_at = Some(Utc::now());
        }
    }

    /// Increment the endpoint's consecutive failure counter.
    ///
    /// Returns the new count, or None if the endpoint no longer exists.
    pub async fn record_endpoint_failure(&self, id: Uuid) -> Option<i32> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints.get_mut(&id)?;
        endpoint.consecutive_failures += 1;
        Some(endpoint.consecutive_failures)
    }

    /// Mark the endpoint inactive until the cooldown expires.
    ///
    /// Returns false if the endpoint is missing or already inactive.
    pub async fn open_circuit(&self, id: Uuid, until: DateTime<Utc>) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(&id) {
            Some(endpoint) if endpoint.active => {
                endpoint.active = false;
                endpoint.disabled_until = Some(until);
                true
            }
            _ => false,
        }
    }

    /// Re-enable an endpoint with a zeroed failure counter.
    pub async fn close_circuit(&self, id: Uuid) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get_mut(&id) {
            Some(endpoint) => {
                endpoint.active = true;
                endpoint.disabled_until = None;
                endpoint.consecutive_failures = 0;
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub async fn insert_event(&self, event: Event) {
        self.events.write().await.insert(event.id, event);
    }

    pub async fn get_event(&self, id: Uuid) -> Option<Event> {
        self.events.read().await.get(&id).cloned()
    }

    // -----------------------------------------------------------------------
    // Deliveries and the dispatch queue
    // -----------------------------------------------------------------------

    /// Persist a pending delivery and enqueue it for dispatch.
    pub async fn insert_delivery(&self, delivery: Delivery) {
        let id = delivery.id;
        self.deliveries.write().await.insert(id, delivery);
        self.queue.lock().await.push_back(id);
    }

    pub async fn get_delivery(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.read().await.get(&id).cloned()
    }

    /// Atomically claim up to `max` pending deliveries for dispatch.
    ///
    /// Each claimed delivery moves to `Delivering`; a given id is handed
    /// to exactly one claimant. Stale queue entries (deleted or no
    /// longer pending) are dropped silently.
    pub async fn claim_ready(&self, max: usize) -> Vec<Delivery> {
        let ids: Vec<Uuid> = {
            let mut queue = self.queue.lock().await;
            let take = max.min(queue.len());
            queue.drain(..take).collect()
        };
        if ids.is_empty() {
            return Vec::new();
        }

        let mut claimed = Vec::with_capacity(ids.len());
        let mut deliveries = self.deliveries.write().await;
        for id in ids {
            if let Some(delivery) = deliveries.get_mut(&id) {
                if delivery.status == DeliveryStatus::Pending {
                    delivery.status = DeliveryStatus::Delivering;
                    claimed.push(delivery.clone());
                }
            }
        }
        claimed
    }

    /// Number of deliveries currently queued for dispatch.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Count an attempt against a delivery: bump the attempt counter and
    /// stamp the attempt time. Returns the updated snapshot.
    pub async fn begin_attempt(&self, id: Uuid) -> Option<Delivery> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries.get_mut(&id)?;
        delivery.attempts += 1;
        delivery.last_attempt_at = Some(Utc::now());
        Some(delivery.clone())
    }

    /// Mark a delivery as delivered (terminal).
    pub async fn complete_delivery(&self, id: Uuid, response_code: i16, response_body: &str) {
        if let Some(delivery) = self.deliveries.write().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Delivered;
            delivery.response_code = Some(response_code);
            delivery.response_body = Some(response_body.to_string());
            delivery.next_retry_at = None;
            delivery.last_error = None;
        }
    }

    /// Record a failed attempt with a scheduled retry.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        response_code: Option<i16>,
        response_body: Option<&str>,
        next_retry_at: DateTime<Utc>,
    ) {
        if let Some(delivery) = self.deliveries.write().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Retrying;
            delivery.last_error = Some(error.to_string());
            delivery.response_code = response_code;
            delivery.response_body = response_body.map(str::to_string);
            delivery.next_retry_at = Some(next_retry_at);
        }
    }

    /// Mark a delivery terminally failed. Never re-queued.
    pub async fn fail_delivery(
        &self,
        id: Uuid,
        error: &str,
        response_code: Option<i16>,
        response_body: Option<&str>,
    ) {
        if let Some(delivery) = self.deliveries.write().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Failed;
            delivery.last_error = Some(error.to_string());
            delivery.response_code = response_code;
            delivery.response_body = response_body.map(str::to_string);
            delivery.next_retry_at = None;
        }
    }

    /// Return a non-terminal delivery to the pending queue. Used when
    /// an internal error prevented the attempt from starting.
    pub async fn requeue_delivery(&self, id: Uuid) {
        let requeued = {
            let mut deliveries = self.deliveries.write().await;
            match deliveries.get_mut(&id) {
                Some(delivery) if !delivery.status.is_terminal() => {
                    delivery.status = DeliveryStatus::Pending;
                    delivery.next_retry_at = None;
                    true
                }
                _ => false,
            }
        };
        if requeued {
            self.queue.lock().await.push_back(id);
        }
    }

    /// Move `Retrying` deliveries whose retry time has arrived back to
    /// `Pending` and enqueue them. Returns how many were promoted.
    pub async fn promote_due_retries(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Uuid> = {
            let mut deliveries = self.deliveries.write().await;
            let ids: Vec<Uuid> = deliveries
                .values()
                .filter(|d| {
                    d.status == DeliveryStatus::Retrying
                        && d.next_retry_at.is_some_and(|t| t <= now)
                })
                .map(|d| d.id)
                .collect();
            for id in &ids {
                if let Some(delivery) = deliveries.get_mut(id) {
                    delivery.status = DeliveryStatus::Pending;
                    delivery.next_retry_at = None;
                }
            }
            ids
        };
        let count = due.len();
        if count > 0 {
            let mut queue = self.queue.lock().await;
            queue.extend(due);
        }
        count
    }

    /// All deliveries for an endpoint, newest first.
    pub async fn deliveries_for_endpoint(&self, endpoint_id: Uuid) -> Vec<Delivery> {
        let mut out: Vec<Delivery> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.endpoint_id == endpoint_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn deliveries_for_event(&self, event_id: Uuid) -> Vec<Delivery> {
        self.deliveries
            .read()
            .await
            .values()
            .filter(|d| d.event_id == event_id)
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Purge events past the event retention window and terminal
    /// deliveries past the delivery retention window.
    ///
    /// Returns (events purged, deliveries purged). Non-terminal
    /// deliveries are never purged.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        event_retention: Duration,
        delivery_retention: Duration,
    ) -> (usize, usize) {
        let event_cutoff = now - event_retention;
        let delivery_cutoff = now - delivery_retention;

        let events_purged = {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, e| e.timestamp > event_cutoff);
            before - events.len()
        };

        let deliveries_purged = {
            let mut deliveries = self.deliveries.write().await;
            let before = deliveries.len();
            deliveries.retain(|_, d| !d.status.is_terminal() || d.created_at > delivery_cutoff);
            before - deliveries.len()
        };

        (events_purged, deliveries_purged)
    }
}
