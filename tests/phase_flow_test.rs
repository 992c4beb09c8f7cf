/// Integration tests for the phase pipeline: one task plays the
/// interception side writing phases through the shared store and bus, the
/// other awaits the operation's break phase the way a strategy does.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chatwire::sync::{MemoryStore, PhaseBus, SharedStore, TriggerFlag};
use chatwire::watch::PhaseWatcher;
use chatwire::{Phase, WireError};

// Initialize logging for tests
fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn pipeline() -> (Arc<dyn SharedStore>, Arc<PhaseBus>) {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    (store, Arc::new(PhaseBus::new()))
}

#[tokio::test]
async fn full_lifecycle_settles_at_data() {
    init_logger();
    let (store, bus) = pipeline();
    let watcher = PhaseWatcher::new(
        store,
        bus,
        "/api/v2/chat/completions",
        Duration::from_secs(5),
        "req-1",
        None,
    );

    let emitter = watcher.clone();
    tokio::spawn(async move {
        for phase in [
            Phase::Request,
            Phase::Headers,
            Phase::Fetch,
            Phase::Response,
        ] {
            emitter.set_phase(phase, json!({"url": "/api/v2/chat/completions"})).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        emitter
            .set_phase(Phase::Data, json!({"body": "{\"answer\":\"42\"}"}))
            .await
            .unwrap();
    });

    let record = watcher.watch(Phase::Data).await.expect("lifecycle settles");
    assert_eq!(record.phase, Phase::Data);
    assert_eq!(record.request_id, "req-1");
    assert_eq!(record.payload["body"], "{\"answer\":\"42\"}");
}

#[tokio::test]
async fn redirected_call_settles_at_fetch() {
    init_logger();
    let (store, bus) = pipeline();
    let trigger = TriggerFlag::new(store.clone());
    trigger.arm().await.unwrap();

    let watcher = PhaseWatcher::new(
        store,
        bus,
        "/api/chat",
        Duration::from_secs(5),
        "req-2",
        Some("http://127.0.0.1:4001/api/fake-stream-chat".to_string()),
    );

    let emitter = watcher.clone();
    tokio::spawn(async move {
        emitter.set_phase(Phase::Request, json!({})).await.unwrap();
        emitter.set_phase(Phase::Headers, json!({})).await.unwrap();
        // The redirect decision happens here; the original target never
        // produces a response stage, so FETCH is the last phase.
        assert!(trigger.check_and_clear().await.unwrap());
        emitter
            .set_phase(Phase::Fetch, json!({"url": "/api/chat"}))
            .await
            .unwrap();
    });

    let record = watcher.watch(Phase::Fetch).await.expect("settles at FETCH");
    assert_eq!(record.phase, Phase::Fetch);
}

#[tokio::test]
async fn error_phase_rejects_the_operation() {
    init_logger();
    let (store, bus) = pipeline();
    let watcher = PhaseWatcher::new(
        store,
        bus,
        "/api/chat",
        Duration::from_secs(5),
        "req-3",
        None,
    );

    let emitter = watcher.clone();
    tokio::spawn(async move {
        emitter.set_phase(Phase::Request, json!({})).await.unwrap();
        emitter
            .set_phase(Phase::Error, json!({"error": "net::ERR_FAILED"}))
            .await
            .unwrap();
    });

    match watcher.watch(Phase::Data).await {
        Err(WireError::Phase(_)) => {}
        other => panic!("expected phase error, got {:?}", other.map(|r| r.phase)),
    }
}

#[tokio::test]
async fn silent_endpoint_times_out_from_init() {
    init_logger();
    let (store, bus) = pipeline();
    let watcher = PhaseWatcher::new(
        store,
        bus,
        "/api/never-called",
        Duration::from_millis(80),
        "req-4",
        None,
    );

    match watcher.watch(Phase::Data).await {
        Err(WireError::Timeout { pattern, .. }) => {
            assert_eq!(pattern, "/api/never-called");
        }
        other => panic!("expected timeout, got {:?}", other.map(|r| r.phase)),
    }
}

#[tokio::test]
async fn concurrent_operations_stay_isolated() {
    init_logger();
    let (store, bus) = pipeline();
    let first = PhaseWatcher::new(
        store.clone(),
        bus.clone(),
        "/api/chat",
        Duration::from_secs(5),
        "req-a",
        None,
    );
    let second = PhaseWatcher::new(
        store,
        bus,
        "/api/chat",
        Duration::from_secs(5),
        "req-b",
        None,
    );

    let (ea, eb) = (first.clone(), second.clone());
    tokio::spawn(async move {
        ea.set_phase(Phase::Data, json!({"body": "a"})).await.unwrap();
    });
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        eb.set_phase(Phase::Data, json!({"body": "b"})).await.unwrap();
    });

    let (ra, rb) = tokio::join!(first.watch(Phase::Data), second.watch(Phase::Data));
    assert_eq!(ra.unwrap().payload["body"], "a");
    assert_eq!(rb.unwrap().payload["body"], "b");
}
