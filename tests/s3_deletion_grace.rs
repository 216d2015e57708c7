//! Scenario S3 (spec.md §8): a desired-pod deletion tears down containers
//! and sandbox and fully reclaims the pod worker.

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
use nodeagentd::status::sink::FakeSink;
use nodeagentd::status::StatusManager;
use nodeagentd::worker::dispatcher::Dispatcher;

use common::{container_spec, simple_pod, spawn_cache_ticker};

#[tokio::test]
async fn pod_deletion_drains_sandbox_and_containers() {
    let cache = Arc::new(PodCache::new());
    let pod_manager = Arc::new(PodManager::new());
    let probe_store = Arc::new(ProbeResultStore::new());
    let backoff = Arc::new(BackoffStore::new());

    let runtime_concrete = Arc::new(FakeRuntime::new());
    let runtime: Arc<dyn RuntimeClient> = runtime_concrete.clone();

    let status_sink = Arc::new(FakeSink::new());
    let status_manager = Arc::new(StatusManager::new(status_sink, Duration::from_secs(60)));

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

    let mut pod = simple_pod("worker", "default", vec![container_spec("app", "img:v1")]);
    pod.spec.termination_grace_period_seconds = 1;
    let uid = pod.uid;

    source_tx
        .send(SourceUpdate {
            source: "file".to_string(),
            op: Op::Add,
            pods: vec![pod.clone()],
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !runtime_concrete.container_ids_for_pod(uid).is_empty(),
        "pod should have a running container before deletion"
    );

    source_tx
        .send(SourceUpdate {
            source: "file".to_string(),
            op: Op::Delete,
            pods: vec![pod],
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(
        runtime_concrete.container_ids_for_pod(uid).is_empty(),
        "deleted pod's containers should be torn down"
    );
    assert!(pod_manager.get_by_uid(uid).is_none(), "deleted pod should be reclaimed");

    cancel.cancel();
    let _ = dispatcher_task.await;
    let _ = ticker_task.await;
}
