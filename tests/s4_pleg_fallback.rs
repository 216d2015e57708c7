//! Scenario S4 (spec.md §8): the evented PLEG exhausts its retry budget and
//! the generic relister keeps the pod cache (and the supervisor's health
//! check) alive in its place.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nodeagentd::cache::PodCache;
use nodeagentd::pleg::{PlegConfig, PlegSupervisor};
use nodeagentd::runtime::fake::FakeRuntime;
use nodeagentd::runtime::RuntimeClient;

#[tokio::test]
async fn evented_exhaustion_falls_back_to_generic_relister() {
    let cache = Arc::new(PodCache::new());
    // `event_sender()` is never called, so every `container_events` call
    // fails immediately and the evented path burns through its retry budget
    // on the first pass.
    let runtime: Arc<dyn RuntimeClient> = Arc::new(FakeRuntime::new());
    let (event_tx, mut event_rx) = mpsc::channel(64);

    let pleg = Arc::new(PlegSupervisor::new(
        runtime,
        cache,
        event_tx,
        PlegConfig {
            relist_period: Duration::from_millis(30),
            relist_threshold: Duration::from_secs(5),
            evented_tick_period: Duration::from_millis(30),
            max_stream_retries: 1,
        },
    ));

    let cancel = CancellationToken::new();
    let pleg_run = pleg.clone();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        pleg_run.run(run_cancel).await;
    });

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(
        pleg.healthy(),
        "generic relister should be keeping the supervisor healthy once evented falls back"
    );

    cancel.cancel();
    let _ = task.await;
    let _ = event_rx.try_recv();
}
