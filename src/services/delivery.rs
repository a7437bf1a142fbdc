//! Delivery dispatch: signed HTTP POSTs and outcome classification.
//!
//! The dispatcher pulls claimed deliveries, re-resolves the live
//! endpoint for its secret and active flag, executes the signed POST
//! with a bounded timeout, and classifies the outcome into the
//! delivery state machine: delivered, retrying, or terminally failed.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::Delivery;
use crate::services::batch::TuningCache;
use crate::store::WebhookStore;

/// User agent sent on every outbound webhook request.
pub const USER_AGENT: &str = "Folio-Webhook/1.0";

/// Response bodies are truncated to this many characters when recorded.
const MAX_RECORDED_BODY: usize = 4096;

/// Classified result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 2xx response; delivery is terminal.
    Delivered,
    /// Failed attempt with attempts remaining; retry scheduled.
    Retrying,
    /// Failed attempt with attempts exhausted; terminally failed.
    Exhausted,
    /// Endpoint deleted or inactive; aborted without counting a failure.
    Aborted,
    /// Internal error; delivery returned to the queue unattempted.
    Requeued,
}

/// Executes claimed deliveries against their endpoints.
pub struct DeliveryDispatcher {
    store: Arc<WebhookStore>,
    http_client: Client,
    encryption_key: [u8; 32],
    backoff_schedule_secs: Vec<i64>,
    default_timeout: StdDuration,
    tuning: Arc<TuningCache>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        store: Arc<WebhookStore>,
        config: &WebhookConfig,
        tuning: Arc<TuningCache>,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            http_client,
            encryption_key: config.encryption_key,
            backoff_schedule_secs: config.backoff_schedule_secs.clone(),
            default_timeout: StdDuration::from_secs(config.request_timeout_secs),
            tuning,
        })
    }

    /// Execute one claimed delivery end to end.
    pub async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        // Re-resolve the live endpoint; registration changes since
        // fan-out must be honored.
        let endpoint = match self.store.get_endpoint(delivery.endpoint_id).await {
            Some(e) => e,
            None => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %delivery.endpoint_id,
                    "Aborting delivery: endpoint no longer exists"
                );
                self.store
                    .fail_delivery(delivery.id, "Endpoint no longer exists", None, None)
                    .await;
                return DispatchOutcome::Aborted;
            }
        };

        if !endpoint.active {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                endpoint_id = %endpoint.id,
                "Aborting delivery: endpoint is disabled"
            );
            self.store
                .fail_delivery(delivery.id, "Endpoint disabled (circuit open)", None, None)
                .await;
            return DispatchOutcome::Aborted;
        }

        let secret = match crypto::decrypt_secret(&endpoint.secret_encrypted, &self.encryption_key)
        {
            Ok(s) => s,
            Err(e) => {
                // Internal misconfiguration, not the endpoint's fault:
                // keep the delivery rather than dropping it.
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Failed to decrypt endpoint secret; re-queueing delivery"
                );
                self.store.requeue_delivery(delivery.id).await;
                return DispatchOutcome::Requeued;
            }
        };

        let delivery = match self.store.begin_attempt(delivery.id).await {
            Some(d) => d,
            None => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    "Delivery record vanished before attempt"
                );
                return DispatchOutcome::Aborted;
            }
        };

        let headers = build_request_headers(&delivery, &secret);
        let timeout = self
            .tuning
            .get(endpoint.id)
            .await
            .map(|t| StdDuration::from_secs(t.timeout_secs))
            .unwrap_or(self.default_timeout);

        let result = self
            .http_client
            .post(&delivery.url)
            .headers(headers)
            .timeout(timeout)
            .body(delivery.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16() as i16;
                let body = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_RECORDED_BODY)
                    .collect::<String>();

                if (200..300).contains(&(status_code as u16)) {
                    self.handle_success(&delivery, endpoint.id, status_code, &body)
                        .await
                } else {
                    self.handle_failure(
                        &delivery,
                        endpoint.id,
                        &format!("HTTP {status_code}"),
                        Some(status_code),
                        Some(&body),
                    )
                    .await
                }
            }
            Err(e) => {
                let error_msg = if e.is_timeout() {
                    format!("Request timeout ({}s)", timeout.as_secs())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };
                self.handle_failure(&delivery, endpoint.id, &error_msg, None, None)
                    .await
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &Delivery,
        endpoint_id: uuid::Uuid,
        response_code: i16,
        response_body: &str,
    ) -> DispatchOutcome {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint_id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_code,
            attempts = delivery.attempts,
            "Webhook delivered"
        );

        self.store
            .complete_delivery(delivery.id, response_code, response_body)
            .await;
        self.store.record_endpoint_success(endpoint_id).await;
        DispatchOutcome::Delivered
    }

    async fn handle_failure(
        &self,
        delivery: &Delivery,
        endpoint_id: uuid::Uuid,
        error_message: &str,
        response_code: Option<i16>,
        response_body: Option<&str>,
    ) -> DispatchOutcome {
        let failures = self.store.record_endpoint_failure(endpoint_id).await;

        let backoff_scale = self
            .tuning
            .get(endpoint_id)
            .await
            .map_or(1.0, |t| t.backoff_scale);
        let next_retry_at = calculate_next_retry_at(
            delivery.attempts,
            delivery.max_attempts,
            &self.backoff_schedule_secs,
            backoff_scale,
        );

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            endpoint_id = %endpoint_id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %error_message,
            attempts = delivery.attempts,
            endpoint_failures = ?failures,
            will_retry = next_retry_at.is_some(),
            "Webhook delivery failed"
        );

        match next_retry_at {
            Some(at) => {
                self.store
                    .schedule_retry(delivery.id, error_message, response_code, response_body, at)
                    .await;
                DispatchOutcome::Retrying
            }
            None => {
                self.store
                    .fail_delivery(delivery.id, error_message, response_code, response_body)
                    .await;
                DispatchOutcome::Exhausted
            }
        }
    }
}

/// Build the headers for one signed webhook request.
///
/// Pure over (delivery, secret): the same payload and secret always
/// produce the same signature, so receivers can re-verify.
pub fn build_request_headers(delivery: &Delivery, secret: &str) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    // Values are built from constants, UUIDs, and hex output; parse
    // failures cannot occur for well-formed event type names, which
    // were validated at emit time.
    if let Ok(v) = "application/json".parse() {
        headers.insert("Content-Type", v);
    }
    if let Ok(v) = crypto::signature_header(secret, delivery.payload.as_bytes()).parse() {
        headers.insert("X-Webhook-Signature", v);
    }
    if let Ok(v) = delivery.event_type.parse() {
        headers.insert("X-Webhook-Event", v);
    }
    if let Ok(v) = delivery.id.to_string().parse() {
        headers.insert("X-Webhook-Delivery", v);
    }
    headers
}

/// Retry delay for a given attempt number, from the escalating
/// schedule, clamped to the last entry.
pub fn calculate_retry_delay_secs(attempts: i32, schedule: &[i64]) -> i64 {
    let idx = (attempts - 1).max(0) as usize;
    schedule
        .get(idx)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(0)
}

/// Next retry timestamp after a failed attempt, or None when attempts
/// are exhausted.
pub fn calculate_next_retry_at(
    attempts: i32,
    max_attempts: i32,
    schedule: &[i64],
    backoff_scale: f64,
) -> Option<DateTime<Utc>> {
    if attempts >= max_attempts {
        return None;
    }
    let base = calculate_retry_delay_secs(attempts, schedule);
    let scaled = ((base as f64) * backoff_scale).round().max(0.0) as i64;
    Some(Utc::now() + Duration::seconds(scaled))
}
