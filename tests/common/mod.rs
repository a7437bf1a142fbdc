//! Common test utilities for folio-webhooks integration tests.
//!
//! Provides mock server responders, engine fixtures, and signature
//! helpers for verifying delivery behavior end to end without any
//! external services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use folio_webhooks::{RegisterEndpoint, WebhookConfig, WebhookEngine};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test owner IDs
pub const OWNER_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const OWNER_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// A configuration suitable for fast in-process tests: HTTP endpoints
/// allowed (mock servers are plain HTTP on loopback), retries due
/// immediately, and a short request timeout.
pub fn test_config() -> WebhookConfig {
    WebhookConfig::default()
        .with_allow_http(true)
        .with_backoff_schedule(vec![0, 0, 0, 0, 0])
        .with_request_timeout_secs(2)
}

/// Build an engine with the fast test configuration.
pub fn test_engine() -> WebhookEngine {
    // RUST_LOG controls verbosity; repeated init attempts are fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    match WebhookEngine::new(test_config()) {
        Ok(engine) => engine,
        Err(e) => panic!("failed to build engine: {e}"),
    }
}

/// Register an endpoint at `{server}/webhook` subscribed to the given
/// event types. Returns the endpoint id and its plaintext secret.
pub async fn register_endpoint(
    engine: &WebhookEngine,
    server: &MockServer,
    owner_id: Uuid,
    event_types: &[&str],
) -> (Uuid, String) {
    let registered = engine
        .register_endpoint(RegisterEndpoint {
            owner_id,
            url: format!("{}/webhook", server.uri()),
            event_types: event_types.iter().map(|s| (*s).to_string()).collect(),
            secret: None,
        })
        .await
        .unwrap();
    (registered.endpoint.id, registered.secret)
}

/// Mount a responder at POST /webhook on the mock server.
pub async fn mount_webhook<R: Respond + 'static>(server: &MockServer, responder: R) {
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Emit a document.uploaded event with a small payload.
pub async fn emit_document_uploaded(engine: &WebhookEngine, owner_id: Uuid) -> Uuid {
    engine
        .emit(
            "document.uploaded",
            serde_json::json!({
                "document_id": Uuid::new_v4().to_string(),
                "title": "Research notes",
                "pages": 12
            }),
            owner_id,
            "document-service",
            None,
        )
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns success
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    /// Create a new capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: 200,
        }
    }

    /// Create a capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            timestamp: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// CountingResponder - counts requests
// ---------------------------------------------------------------------------

/// A wiremock responder that counts incoming requests.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    /// Create a new counting responder that returns 200 OK.
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: 200,
        }
    }

    /// Create a counting responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: status,
        }
    }

    /// Get the current request count.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
    success_code: u16,
}

impl FailingResponder {
    /// Create a responder that fails `n` times with 500, then returns 200.
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code: 500,
            success_code: 200,
        }
    }

    /// Get the current attempt count.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(self.success_code)
        }
    }
}

/// A success responder that stalls for `delay_ms` before answering.
pub fn slow_ok(delay_ms: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(delay_ms))
}

// ---------------------------------------------------------------------------
// Signature verification helpers
// ---------------------------------------------------------------------------

/// Compute the HMAC-SHA256 hex signature over a request body.
pub fn compute_test_signature(secret: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the signature header of a captured request.
pub fn verify_captured_signature(request: &CapturedRequest, secret: &str) -> bool {
    let signature_header = match request.header("x-webhook-signature") {
        Some(h) => h,
        None => return false,
    };
    let expected = format!("sha256={}", compute_test_signature(secret, &request.body));
    signature_header == expected
}
