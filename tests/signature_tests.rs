//! Integration tests for webhook payload signing.
//!
//! Tests verify the signature header format, that receivers can verify
//! signatures against the raw body, and that each endpoint signs with
//! its own secret.

mod common;

use common::*;
use folio_webhooks::crypto;

/// The signature header is `sha256=<hex>` over the exact raw body.
#[tokio::test]
async fn test_signature_header_format() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let capture = CaptureResponder::new();
    mount_webhook(&server, capture.clone()).await;

    let (_id, secret) =
        register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;

    emit_document_uploaded(&engine, OWNER_A).await;
    engine.run_dispatch_cycle().await;

    let captured = &capture.requests()[0];
    let header = captured.header("x-webhook-signature").unwrap();
    assert!(header.starts_with("sha256="));

    let hex_part = header.strip_prefix("sha256=").unwrap();
    assert_eq!(hex_part.len(), 64);
    assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(
        header,
        format!("sha256={}", compute_test_signature(&secret, &captured.body))
    );
}

/// The crate's own verification helper accepts a genuine signature and
/// rejects a tampered body.
#[tokio::test]
async fn test_receiver_side_verification() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let capture = CaptureResponder::new();
    mount_webhook(&server, capture.clone()).await;

    let (_id, secret) =
        register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;

    emit_document_uploaded(&engine, OWNER_A).await;
    engine.run_dispatch_cycle().await;

    let captured = &capture.requests()[0];
    let header = captured.header("x-webhook-signature").unwrap();

    assert!(crypto::verify_signature(header, &secret, &captured.body));

    let mut tampered = captured.body.clone();
    tampered[0] ^= 0x01;
    assert!(!crypto::verify_signature(header, &secret, &tampered));

    assert!(!crypto::verify_signature(
        header,
        "whsec_wrong",
        &captured.body
    ));
}

/// Two endpoints receiving the same event sign with their own secrets.
#[tokio::test]
async fn test_each_endpoint_signs_with_own_secret() {
    let engine = test_engine();
    let server_a = wiremock::MockServer::start().await;
    let server_b = wiremock::MockServer::start().await;
    let capture_a = CaptureResponder::new();
    let capture_b = CaptureResponder::new();
    mount_webhook(&server_a, capture_a.clone()).await;
    mount_webhook(&server_b, capture_b.clone()).await;

    let (_id_a, secret_a) =
        register_endpoint(&engine, &server_a, OWNER_A, &["document.uploaded"]).await;
    let (_id_b, secret_b) =
        register_endpoint(&engine, &server_b, OWNER_A, &["document.uploaded"]).await;
    assert_ne!(secret_a, secret_b);

    emit_document_uploaded(&engine, OWNER_A).await;
    engine.run_dispatch_cycle().await;

    let req_a = &capture_a.requests()[0];
    let req_b = &capture_b.requests()[0];
    assert!(verify_captured_signature(req_a, &secret_a));
    assert!(verify_captured_signature(req_b, &secret_b));

    // Cross-verification fails
    assert!(!verify_captured_signature(req_a, &secret_b));
    assert!(!verify_captured_signature(req_b, &secret_a));
}

/// Retried deliveries re-sign the same stored payload, so signatures
/// are stable across attempts.
#[tokio::test]
async fn test_signature_stable_across_retries() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let capture = CaptureResponder::with_status(500);
    mount_webhook(&server, capture.clone()).await;

    register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;
    emit_document_uploaded(&engine, OWNER_A).await;

    engine.run_dispatch_cycle().await;
    engine.run_retry_scan().await;
    engine.run_dispatch_cycle().await;

    let requests = capture.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(
        requests[0].header("x-webhook-signature"),
        requests[1].header("x-webhook-signature")
    );
}

/// A caller-supplied secret is used as-is for signing.
#[tokio::test]
async fn test_caller_supplied_secret() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let capture = CaptureResponder::new();
    mount_webhook(&server, capture.clone()).await;

    let registered = engine
        .register_endpoint(folio_webhooks::RegisterEndpoint {
            owner_id: OWNER_A,
            url: format!("{}/webhook", server.uri()),
            event_types: vec!["document.uploaded".to_string()],
            secret: Some("whsec_caller_chosen_secret".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(registered.secret, "whsec_caller_chosen_secret");

    emit_document_uploaded(&engine, OWNER_A).await;
    engine.run_dispatch_cycle().await;

    assert!(verify_captured_signature(
        &capture.requests()[0],
        "whsec_caller_chosen_secret"
    ));
}
