//! Scenario S5 (spec.md §8): a static pod (one carrying `config-hash`)
//! produces a companion mirror pod pushed through `MirrorManager`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nodeagentd::backoff::BackoffStore;
use nodeagentd::cache::PodCache;
use nodeagentd::mirror::{FakeMirrorSink, MirrorManager};
use nodeagentd::pod_manager::PodManager;
use nodeagentd::probes::manager::ProberManager;
use nodeagentd::probes::store::ProbeResultStore;
use nodeagentd::runtime::fake::FakeRuntime;
use nodeagentd::runtime::RuntimeClient;
use nodeagentd::sources::{Op, SourceUpdate};
use nodeagentd::status::sink::FakeSink;
use nodeagentd::status::StatusManager;
use nodeagentd::types::pod::ANNOTATION_CONFIG_HASH;
use nodeagentd::worker::dispatcher::Dispatcher;

use common::{container_spec, simple_pod, spawn_cache_ticker};

#[tokio::test]
async fn static_pod_produces_mirror_pod() {
    let cache = Arc::new(PodCache::new());
    let pod_manager = Arc::new(PodManager::new());
    let probe_store = Arc::new(ProbeResultStore::new());
    let backoff = Arc::new(BackoffStore::new());
    let runtime: Arc<dyn RuntimeClient> = Arc::new(FakeRuntime::new());

    let status_sink = Arc::new(FakeSink::new());
    let status_manager = Arc::new(StatusManager::new(status_sink, Duration::from_secs(60)));

    let (probe_kill_tx, probe_kill_rx) = mpsc::channel(8);
    let prober = ProberManager::new(cache.clone(), probe_store.clone(), runtime.clone(), probe_kill_tx);

    let mirror_sink = Arc::new(FakeMirrorSink::new());
    let mirror_manager = Arc::new(MirrorManager::new(mirror_sink.clone(), pod_manager.clone()));
    let (mirror_tx, mirror_rx) = mpsc::channel(8);

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

    let mirror_cancel = cancel.clone();
    let mirror_manager2 = mirror_manager.clone();
    let mirror_task = tokio::spawn(async move {
        let mut mirror_rx = mirror_rx;
        mirror_manager2.run(&mut mirror_rx, mirror_cancel).await;
    });

    let mut pod = simple_pod("sp1", "default", vec![container_spec("app", "img:v1")]);
    pod.annotations.insert(ANNOTATION_CONFIG_HASH.to_string(), "h1".to_string());

    source_tx
        .send(SourceUpdate {
            source: "file".to_string(),
            op: Op::Add,
            pods: vec![pod],
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(mirror_sink.upserts.lock().await.len(), 1);
    let mirror = pod_manager.mirror_by_full_name("sp1_default").expect("mirror pod created");
    assert_eq!(mirror.config_mirror(), Some("h1"));

    cancel.cancel();
    let _ = dispatcher_task.await;
    let _ = mirror_task.await;
    let _ = ticker_task.await;
}
