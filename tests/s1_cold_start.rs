//! Scenario S1 (spec.md §8): a brand new pod goes from desired-only to a
//! running sandbox and container, with its status pushed to the sink.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nodeagentd::backoff::BackoffStore;
use nodeagentd::cache::PodCache;
use nodeagentd::pod_manager::PodManager;
use nodeagentd::probes::manager::ProberManager;
use nodeagentd::probes::store::ProbeResultStore;
use nodeagentd::runtime::fake::FakeRuntime;
use nodeagentd::runtime::RuntimeClient;
use nodeagentd::sources::{Op, SourceUpdate};
use nodeagentd::status::sink::HttpStatusSink;
use nodeagentd::status::StatusManager;
use nodeagentd::worker::dispatcher::Dispatcher;

use common::{container_spec, simple_pod, spawn_cache_ticker, start_mock_server};

#[tokio::test]
async fn cold_start_creates_sandbox_and_pushes_status() {
    let server = start_mock_server().await;

    let cache = Arc::new(PodCache::new());
    let pod_manager = Arc::new(PodManager::new());
    let probe_store = Arc::new(ProbeResultStore::new());
    let backoff = Arc::new(BackoffStore::new());

    let runtime_concrete = Arc::new(FakeRuntime::new());
    let runtime: Arc<dyn RuntimeClient> = runtime_concrete.clone();

    let status_sink = Arc::new(HttpStatusSink::new(server.uri()));
    let status_manager = Arc::new(StatusManager::new(status_sink, Duration::from_millis(20)));

    let (probe_kill_tx, probe_kill_rx) = mpsc::channel(8);
    let prober = ProberManager::new(cache.clone(), probe_store.clone(), runtime.clone(), probe_kill_tx);

    let (mirror_tx, _mirror_rx) = mpsc::channel(8);
    let (source_tx, source_rx) = mpsc::channel(8);
    let (_pleg_tx, pleg_rx) = mpsc::channel(8);
    let (_eviction_tx, eviction_rx) = mpsc::channel(8);

    let mut dispatcher = Dispatcher::new(
        pod_manager.clone(),
        cache.clone(),
        runtime.clone(),
        status_manager.clone(),
        probe_store.clone(),
        backoff.clone(),
        prober,
        mirror_tx,
        Duration::from_secs(100),
    );

    let cancel = CancellationToken::new();
    let dispatcher_cancel = cancel.clone();
    let dispatcher_task = tokio::spawn(async move {
        let mut source_rx = source_rx;
        let mut pleg_rx = pleg_rx;
        let mut probe_kill_rx = probe_kill_rx;
        let mut eviction_rx = eviction_rx;
        dispatcher
            .run(
                &mut source_rx,
                &mut pleg_rx,
                &mut probe_kill_rx,
                &mut eviction_rx,
                dispatcher_cancel,
            )
            .await;
    });

    let ticker_task = spawn_cache_ticker(cache.clone(), cancel.clone());

    let status_cancel = cancel.clone();
    let status_manager2 = status_manager.clone();
    let status_task = tokio::spawn(async move {
        let _ = status_manager2.run(status_cancel).await;
    });

    let pod = simple_pod("web", "default", vec![container_spec("app", "img:v1")]);
    let uid = pod.uid;
    source_tx
        .send(SourceUpdate {
            source: "file".to_string(),
            op: Op::Add,
            pods: vec![pod],
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    cancel.cancel();
    let _ = dispatcher_task.await;
    let _ = status_task.await;
    let _ = ticker_task.await;

    let calls = runtime_concrete.calls.lock().unwrap().clone();
    assert!(calls.contains(&"run_pod_sandbox".to_string()));
    assert!(calls.contains(&"create_container".to_string()));
    assert!(calls.contains(&"start_container".to_string()));
    assert!(!runtime_concrete.container_ids_for_pod(uid).is_empty());

    let requests = server.received_requests().await.expect("mock server must record requests");
    assert!(
        requests
            .iter()
            .any(|r| r.method.as_str() == "PATCH" && r.url.path() == "/pods/web_default"),
        "expected a status push for the new pod, got: {requests:?}"
    );
}
