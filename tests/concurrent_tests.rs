//! Integration tests for batched concurrent dispatch and the
//! background worker.

mod common;

use std::time::{Duration, Instant};

use common::*;
use folio_webhooks::{DeliveryStatus, WebhookEngine};
use uuid::Uuid;

/// Deliveries in a batch go out concurrently, not sequentially.
#[tokio::test]
async fn test_batch_dispatch_is_concurrent() {
    let engine = test_engine();

    // Ten endpoints, each 300ms slow. Sequential dispatch would need
    // three seconds; a concurrent batch finishes in roughly one delay.
    let mut servers = Vec::new();
    for _ in 0..10 {
        let server = wiremock::MockServer::start().await;
        mount_webhook(&server, slow_ok(300)).await;
        register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;
        servers.push(server);
    }

    let event_id = emit_document_uploaded(&engine, OWNER_A).await;
    assert_eq!(engine.queue_len().await, 10);

    let started = Instant::now();
    let dispatched = engine.run_dispatch_cycle().await;
    let elapsed = started.elapsed();

    assert_eq!(dispatched, 10);
    assert!(
        elapsed < Duration::from_millis(1500),
        "batch took {elapsed:?}, dispatch looks sequential"
    );

    for delivery in engine.deliveries_for_event(event_id).await {
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
    }
}

/// The dispatch cycle drains the queue in batches of the configured
/// size until empty.
#[tokio::test]
async fn test_dispatch_cycle_drains_beyond_one_batch() {
    let config = test_config().with_batch_size(3);
    let engine = match WebhookEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => panic!("failed to build engine: {e}"),
    };

    let server = wiremock::MockServer::start().await;
    let counter = CountingResponder::new();
    mount_webhook(&server, counter.clone()).await;
    register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;

    for _ in 0..7 {
        emit_document_uploaded(&engine, OWNER_A).await;
    }
    assert_eq!(engine.queue_len().await, 7);

    let dispatched = engine.run_dispatch_cycle().await;
    assert_eq!(dispatched, 7);
    assert_eq!(counter.count(), 7);
    assert_eq!(engine.queue_len().await, 0);
}

/// Concurrent dispatch cycles never double-deliver: each queued
/// delivery is claimed by exactly one cycle.
#[tokio::test]
async fn test_concurrent_cycles_claim_exclusively() {
    let engine = std::sync::Arc::new(test_engine());

    let server = wiremock::MockServer::start().await;
    let counter = CountingResponder::new();
    mount_webhook(&server, counter.clone()).await;
    register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;

    for _ in 0..20 {
        emit_document_uploaded(&engine, OWNER_A).await;
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.run_dispatch_cycle().await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 20);
    assert_eq!(counter.count(), 20);
}

/// A lone queued delivery goes out on the next worker tick instead of
/// sitting out the batch fill window.
#[tokio::test]
async fn test_singleton_delivery_skips_batch_window() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let counter = CountingResponder::new();
    mount_webhook(&server, counter.clone()).await;
    register_endpoint(&engine, &server, OWNER_A, &["document.uploaded"]).await;

    let (worker, task) = engine.start_workers();
    let started = Instant::now();
    emit_document_uploaded(&engine, OWNER_A).await;

    let deadline = started + Duration::from_secs(3);
    while counter.count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let elapsed = started.elapsed();
    assert_eq!(counter.count(), 1);
    assert!(
        elapsed < Duration::from_secs(3),
        "singleton delivery took {elapsed:?}"
    );

    worker.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

/// The spawned worker delivers end to end on its own timers, including
/// events arriving over the bus, and stops on shutdown.
#[tokio::test]
async fn test_background_worker_delivers_bus_events() {
    let engine = test_engine();
    let server = wiremock::MockServer::start().await;
    let capture = CaptureResponder::new();
    mount_webhook(&server, capture.clone()).await;

    register_endpoint(&engine, &server, OWNER_A, &["collaboration.note_synced"]).await;

    let (worker, task) = engine.start_workers();

    let publisher = engine.publisher();
    publisher.publish(folio_webhooks::BusMessage {
        event_type: "collaboration.note_synced".to_string(),
        user_id: OWNER_A,
        data: serde_json::json!({"note_id": Uuid::new_v4().to_string()}),
        metadata: None,
        timestamp: chrono::Utc::now(),
        source: "collaboration-service".to_string(),
    });

    // The worker polls every second by default; give it a few ticks
    let deadline = Instant::now() + Duration::from_secs(5);
    while capture.request_count() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(capture.request_count(), 1);
    assert_eq!(
        capture.requests()[0].header("x-webhook-event"),
        Some("collaboration.note_synced")
    );

    worker.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    assert!(worker.is_shutdown());
}
