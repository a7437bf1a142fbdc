//! Engine configuration.
//!
//! Defaults match production behavior; every knob has a `with_*`
//! override so tests can shrink timers and schedules.

use std::env;

use crate::error::WebhookError;

/// Default maximum delivery attempts per delivery.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Default consecutive failure threshold before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 5;

/// Default circuit cooldown before an endpoint is re-enabled.
pub const DEFAULT_CIRCUIT_COOLDOWN_SECS: i64 = 300;

/// Escalating retry schedule in seconds, indexed by attempt number and
/// clamped to the last entry.
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [i64; 5] = [60, 300, 900, 3600, 7200];

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Maximum delivery attempts before a delivery is terminally failed.
    pub max_attempts: i32,
    /// Retry delay schedule in seconds, indexed by attempt number.
    pub backoff_schedule_secs: Vec<i64>,
    /// Outbound HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Consecutive failures before the circuit breaker opens.
    pub failure_threshold: i32,
    /// Cooldown in seconds before an opened circuit resets.
    pub circuit_cooldown_secs: i64,
    /// Interval between circuit breaker scans.
    pub circuit_scan_interval_secs: u64,
    /// Maximum deliveries dispatched in one concurrent batch.
    pub batch_size: usize,
    /// Window in milliseconds to wait for a batch to fill.
    pub batch_window_ms: u64,
    /// Interval between retry scheduler polls.
    pub retry_poll_interval_ms: u64,
    /// TTL for cached per-endpoint tuning parameters.
    pub tuning_ttl_secs: i64,
    /// Event records are retained this many hours for audit.
    pub event_retention_hours: i64,
    /// Terminal delivery records are retained this many days for metrics.
    pub delivery_retention_days: i64,
    /// Maximum registered endpoints per owner.
    pub max_endpoints_per_owner: usize,
    /// Allow plain-HTTP endpoint URLs (dev/test only).
    pub allow_http: bool,
    /// AES-256-GCM key for endpoint secrets at rest.
    pub encryption_key: [u8; 32],
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_schedule_secs: DEFAULT_BACKOFF_SCHEDULE_SECS.to_vec(),
            request_timeout_secs: 30,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_cooldown_secs: DEFAULT_CIRCUIT_COOLDOWN_SECS,
            circuit_scan_interval_secs: 60,
            batch_size: 10,
            batch_window_ms: 5_000,
            retry_poll_interval_ms: 1_000,
            tuning_ttl_secs: 300,
            event_retention_hours: 24,
            delivery_retention_days: 7,
            max_endpoints_per_owner: 25,
            allow_http: false,
            encryption_key: random_key(),
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FOLIO_WEBHOOK_SECRET_KEY`: 64 hex chars (32 bytes)
    ///
    /// Optional (defaults in parentheses):
    /// - `FOLIO_WEBHOOK_MAX_ATTEMPTS` (5)
    /// - `FOLIO_WEBHOOK_TIMEOUT_SECS` (30)
    /// - `FOLIO_WEBHOOK_FAILURE_THRESHOLD` (5)
    /// - `FOLIO_WEBHOOK_CIRCUIT_COOLDOWN_SECS` (300)
    /// - `FOLIO_WEBHOOK_BATCH_SIZE` (10)
    /// - `FOLIO_WEBHOOK_ALLOW_HTTP` (false)
    pub fn from_env() -> Result<Self, WebhookError> {
        let mut config = Self::default();

        let key_hex =
            env::var("FOLIO_WEBHOOK_SECRET_KEY").map_err(|_| WebhookError::ConfigInvalid {
                var: "FOLIO_WEBHOOK_SECRET_KEY".to_string(),
                reason: "not set".to_string(),
            })?;
        let key_bytes = hex::decode(key_hex.trim()).map_err(|e| WebhookError::ConfigInvalid {
            var: "FOLIO_WEBHOOK_SECRET_KEY".to_string(),
            reason: format!("invalid hex: {e}"),
        })?;
        config.encryption_key =
            key_bytes
                .try_into()
                .map_err(|_| WebhookError::ConfigInvalid {
                    var: "FOLIO_WEBHOOK_SECRET_KEY".to_string(),
                    reason: "expected 32 bytes".to_string(),
                })?;

        if let Some(v) = parse_env("FOLIO_WEBHOOK_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = parse_env("FOLIO_WEBHOOK_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = parse_env("FOLIO_WEBHOOK_FAILURE_THRESHOLD")? {
            config.failure_threshold = v;
        }
        if let Some(v) = parse_env("FOLIO_WEBHOOK_CIRCUIT_COOLDOWN_SECS")? {
            config.circuit_cooldown_secs = v;
        }
        if let Some(v) = parse_env("FOLIO_WEBHOOK_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = parse_env::<bool>("FOLIO_WEBHOOK_ALLOW_HTTP")? {
            config.allow_http = v;
        }

        Ok(config)
    }

    /// Set the maximum delivery attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Replace the retry schedule (seconds per attempt).
    #[must_use]
    pub fn with_backoff_schedule(mut self, schedule: Vec<i64>) -> Self {
        self.backoff_schedule_secs = schedule;
        self
    }

    /// Set the outbound request timeout.
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the circuit breaker failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: i32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the circuit cooldown.
    #[must_use]
    pub fn with_circuit_cooldown_secs(mut self, secs: i64) -> Self {
        self.circuit_cooldown_secs = secs;
        self
    }

    /// Set the batch size for concurrent dispatch.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the batch collection window.
    #[must_use]
    pub fn with_batch_window_ms(mut self, ms: u64) -> Self {
        self.batch_window_ms = ms;
        self
    }

    /// Allow plain-HTTP endpoint URLs (dev/test only).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Set the per-owner endpoint limit.
    #[must_use]
    pub fn with_max_endpoints_per_owner(mut self, max: usize) -> Self {
        self.max_endpoints_per_owner = max;
        self
    }

    /// Set the secret encryption key.
    #[must_use]
    pub fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = key;
        self
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, WebhookError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| WebhookError::ConfigInvalid {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn random_key() -> [u8; 32] {
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}
