//! Endpoint registry: registration, unregistration, stats-enriched listing.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::{WebhookError, WebhookResult};
use crate::models::{Endpoint, EndpointWithStats, RegisterEndpoint, RegisteredEndpoint};
use crate::services::stats;
use crate::store::WebhookStore;
use crate::validation;

/// Service for webhook endpoint registration and lookup.
#[derive(Clone)]
pub struct EndpointRegistry {
    store: Arc<WebhookStore>,
    encryption_key: [u8; 32],
    max_endpoints_per_owner: usize,
    failure_threshold: i32,
    allow_http: bool,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new(store: Arc<WebhookStore>, config: &WebhookConfig) -> Self {
        Self {
            store,
            encryption_key: config.encryption_key,
            max_endpoints_per_owner: config.max_endpoints_per_owner,
            failure_threshold: config.failure_threshold,
            allow_http: config.allow_http,
        }
    }

    /// Register a new endpoint.
    ///
    /// Validates the URL and event types, generates a signing secret if
    /// none is supplied, encrypts it at rest, and indexes the endpoint
    /// under every subscribed event type. The plaintext secret is
    /// returned exactly once in the response.
    pub async fn register(&self, request: RegisterEndpoint) -> WebhookResult<RegisteredEndpoint> {
        validation::validate_webhook_url(&request.url, self.allow_http)?;
        validation::validate_event_types(&request.event_types)?;

        let count = self
            .store
            .count_endpoints_by_owner(request.owner_id)
            .await;
        if count >= self.max_endpoints_per_owner {
            return Err(WebhookError::EndpointLimitExceeded {
                limit: self.max_endpoints_per_owner,
            });
        }

        let secret = match request.secret {
            Some(s) if !s.is_empty() => s,
            _ => crypto::generate_secret(),
        };
        let secret_encrypted = crypto::encrypt_secret(&secret, &self.encryption_key)?;

        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            url: request.url,
            event_types: request.event_types,
            secret_encrypted,
            active: true,
            disabled_until: None,
            created_at: Utc::now(),
            last_triggered_at: None,
            consecutive_failures: 0,
            max_failures: self.failure_threshold,
        };

        tracing::info!(
            target: "webhook_registry",
            endpoint_id = %endpoint.id,
            owner_id = %endpoint.owner_id,
            url = %endpoint.url,
            event_types = ?endpoint.event_types,
            "Registered webhook endpoint"
        );

        self.store.insert_endpoint(endpoint.clone()).await;

        Ok(RegisteredEndpoint { endpoint, secret })
    }

    /// Unregister an endpoint.
    ///
    /// Verifies ownership before deletion; returns false if the
    /// endpoint does not exist or belongs to a different owner.
    /// In-flight deliveries are not touched here; dispatch aborts them
    /// when it finds the endpoint gone.
    pub async fn unregister(&self, endpoint_id: Uuid, owner_id: Uuid) -> bool {
        match self.store.get_endpoint(endpoint_id).await {
            Some(endpoint) if endpoint.owner_id == owner_id => {
                self.store.remove_endpoint(endpoint_id).await;
                tracing::info!(
                    target: "webhook_registry",
                    endpoint_id = %endpoint_id,
                    owner_id = %owner_id,
                    "Unregistered webhook endpoint"
                );
                true
            }
            _ => false,
        }
    }

    /// List an owner's endpoints, enriched with delivery statistics.
    pub async fn list(&self, owner_id: Uuid) -> Vec<EndpointWithStats> {
        let endpoints = self.store.list_endpoints_by_owner(owner_id).await;
        let mut out = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let stats = stats::endpoint_stats(&self.store, &endpoint).await;
            out.push(EndpointWithStats { endpoint, stats });
        }
        out
    }
}
