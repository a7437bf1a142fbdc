//! Error types for the webhook engine.

/// Webhook engine error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Endpoint limit ({limit}) reached for owner")]
    EndpointLimitExceeded { limit: usize },

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type WebhookResult<T> = Result<T, WebhookError>;
