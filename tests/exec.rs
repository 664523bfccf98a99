//! Worker lifecycle: timeouts, failure, restart, cancellation

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use wakeline::Error;
use wakeline::exec::{
    DEFAULT_DISPATCH_TIMEOUT, InferenceRequest, InferenceResponse, WorkerKind, WorkerOptions,
    WorkerOrchestrator,
};

#[tokio::test]
async fn slow_model_times_out_with_a_distinct_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.make_slow("wake-melspec");
    let orchestrator = WorkerOrchestrator::new(backend);
    let handle =
        orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());

    let result = orchestrator
        .dispatch(
            &handle,
            InferenceRequest::Run {
                model: "wake-melspec".to_string(),
                inputs: Vec::new(),
            },
            Duration::from_millis(10),
        )
        .await;
    match result {
        Err(Error::Timeout(t)) => assert_eq!(t, Duration::from_millis(10)),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn worker_panic_rejects_in_flight_and_restarts() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = WorkerOrchestrator::new(backend);
    let options = WorkerOptions {
        restart_backoff: Duration::from_millis(50),
        ..WorkerOptions::default()
    };
    let handle = orchestrator.create_worker("wake-word", WorkerKind::WakeWord, options);
    assert_eq!(orchestrator.worker_generation("wake-word"), Some(0));

    let result = orchestrator
        .dispatch(
            &handle,
            InferenceRequest::Run {
                model: "panic".to_string(),
                inputs: Vec::new(),
            },
            DEFAULT_DISPATCH_TIMEOUT,
        )
        .await;
    assert!(matches!(result, Err(Error::Worker(_))), "got {result:?}");

    // Supervisor recreates the worker after the backoff
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.worker_generation("wake-word"), Some(1));

    let response = orchestrator
        .dispatch(&handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(response, InferenceResponse::Pong));
}

#[tokio::test]
async fn disabled_auto_restart_leaves_the_worker_down() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = WorkerOrchestrator::new(backend);
    let options = WorkerOptions {
        auto_restart: false,
        restart_backoff: Duration::from_millis(50),
        ..WorkerOptions::default()
    };
    let handle = orchestrator.create_worker("wake-word", WorkerKind::WakeWord, options);

    let _ = orchestrator
        .dispatch(
            &handle,
            InferenceRequest::Run {
                model: "panic".to_string(),
                inputs: Vec::new(),
            },
            DEFAULT_DISPATCH_TIMEOUT,
        )
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.worker_generation("wake-word"), None);
    let result = orchestrator
        .dispatch(&handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
        .await;
    assert!(matches!(result, Err(Error::Worker(_))));
}

#[tokio::test]
async fn replacing_a_worker_bumps_no_generation_and_still_serves() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = WorkerOrchestrator::new(backend);
    let first =
        orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());
    let second =
        orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());
    assert_eq!(orchestrator.worker_count(), 1);

    // Both handles address the live entry by name
    for handle in [&first, &second] {
        let response = orchestrator
            .dispatch(handle, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(response, InferenceResponse::Pong));
    }
}

#[tokio::test]
async fn recreating_a_worker_as_inline_tears_down_the_dedicated_thread() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = WorkerOrchestrator::new(backend);
    let _dedicated =
        orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());
    assert_eq!(orchestrator.worker_count(), 1);

    let inline = orchestrator.create_worker(
        "wake-word",
        WorkerKind::WakeWord,
        WorkerOptions {
            use_worker: false,
            ..WorkerOptions::default()
        },
    );
    assert!(inline.is_inline());
    assert_eq!(orchestrator.worker_count(), 0);

    let response = orchestrator
        .dispatch(&inline, InferenceRequest::Ping, DEFAULT_DISPATCH_TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(response, InferenceResponse::Pong));
}

#[tokio::test]
async fn cancel_pending_settles_in_flight_dispatches() {
    let backend = Arc::new(FakeBackend::new());
    backend.make_slow("wake-melspec");
    let orchestrator = WorkerOrchestrator::new(backend);
    let handle =
        orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());

    let dispatcher = orchestrator.clone();
    let dispatch_handle = handle.clone();
    let in_flight = tokio::spawn(async move {
        dispatcher
            .dispatch(
                &dispatch_handle,
                InferenceRequest::Run {
                    model: "wake-melspec".to_string(),
                    inputs: Vec::new(),
                },
                DEFAULT_DISPATCH_TIMEOUT,
            )
            .await
    });

    // Let the dispatch enter the pending map, then flush it
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.cancel_pending(&handle);

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
}

#[tokio::test]
async fn shutdown_removes_every_worker() {
    let backend = Arc::new(FakeBackend::new());
    let orchestrator = WorkerOrchestrator::new(backend);
    let _wake = orchestrator.create_worker("wake-word", WorkerKind::WakeWord, WorkerOptions::default());
    let _vad = orchestrator.create_worker("vad", WorkerKind::Vad, WorkerOptions::default());
    assert_eq!(orchestrator.worker_count(), 2);

    orchestrator.shutdown();
    assert_eq!(orchestrator.worker_count(), 0);
}
