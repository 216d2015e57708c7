//! Node agent entry point: wires sources, cache, PLEG, prober, eviction,
//! status push, mirror pods and the per-pod dispatcher together.
//!
//! Shaped like the teacher's `main.rs` (`tracing_subscriber` from
//! `EnvFilter`, a handful of long-lived futures joined with
//! `tokio::try_join!`), widened from four subsystems to the full set this
//! agent runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nodeagentd::backoff::BackoffStore;
use nodeagentd::cache::PodCache;
use nodeagentd::config::Config;
use nodeagentd::eviction::signals::ProcNodeSignalSource;
use nodeagentd::eviction::{EvictionManager, Signal, Threshold, ThresholdOp};
use nodeagentd::mirror::{HttpMirrorSink, MirrorManager};
use nodeagentd::pleg::{PlegConfig, PlegSupervisor};
use nodeagentd::pod_manager::PodManager;
use nodeagentd::probes::manager::ProberManager;
use nodeagentd::probes::store::ProbeResultStore;
use nodeagentd::runtime::docker::{DockerRuntime, DockerUsageSource};
use nodeagentd::runtime::RuntimeClient;
use nodeagentd::sources::mux::SourceMux;
use nodeagentd::sources::{file::FileSource, sink_watch::SinkWatchSource, url::UrlSource, Source};
use nodeagentd::status::sink::HttpStatusSink;
use nodeagentd::status::StatusManager;
use nodeagentd::worker::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodeagentd=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = Config::from_env();
    tracing::info!(node_name = %config.node_name, sink_url = %config.sink_url, "starting node agent");

    let cancel = CancellationToken::new();

    let runtime: Arc<dyn RuntimeClient> =
        Arc::new(DockerRuntime::connect().map_err(|e| format!("runtime connect: {e}"))?);
    match runtime.version(&cancel).await {
        Ok(version) => tracing::info!(version, "connected to container runtime"),
        Err(err) => tracing::warn!(error = %err, "could not read runtime version"),
    }

    let cache = Arc::new(PodCache::new());
    let pod_manager = Arc::new(PodManager::new());
    let probe_store = Arc::new(ProbeResultStore::new());
    let backoff = Arc::new(BackoffStore::new());

    let status_sink = Arc::new(HttpStatusSink::new(config.sink_url.clone()));
    let status_manager = Arc::new(StatusManager::new(status_sink, config.status_flush_period));

    let mirror_sink = Arc::new(HttpMirrorSink::new(config.sink_url.clone()));
    let mirror_manager = Arc::new(MirrorManager::new(mirror_sink, pod_manager.clone()));
    let (mirror_tx, mirror_rx) = mpsc::channel(64);

    let (probe_kill_tx, probe_kill_rx) = mpsc::channel(64);
    let prober = ProberManager::new(cache.clone(), probe_store.clone(), runtime.clone(), probe_kill_tx);

    let (pleg_event_tx, pleg_event_rx) = mpsc::channel(256);
    let pleg = Arc::new(PlegSupervisor::new(
        runtime.clone(),
        cache.clone(),
        pleg_event_tx,
        PlegConfig {
            relist_period: config.pleg_relist_period,
            relist_threshold: config.pleg_relist_threshold,
            evented_tick_period: config.pleg_evented_tick_period,
            max_stream_retries: config.pleg_max_stream_retries,
        },
    ));

    let (eviction_tx, eviction_rx) = mpsc::channel(16);
    let eviction_manager = Arc::new(EvictionManager::new(
        vec![
            Threshold {
                signal: Signal::MemoryAvailable,
                op: ThresholdOp::LessThan,
                value: config.eviction_hard_memory_threshold_bytes,
                grace_period: Duration::ZERO,
                hard: true,
            },
            Threshold {
                signal: Signal::MemoryAvailable,
                op: ThresholdOp::LessThan,
                value: config.eviction_soft_memory_threshold_bytes,
                grace_period: config.eviction_soft_memory_grace,
                hard: false,
            },
        ],
        Arc::new(ProcNodeSignalSource::new()),
        Arc::new(
            DockerUsageSource::connect().map_err(|e| format!("usage source connect: {e}"))?,
        ),
        pod_manager.clone(),
        eviction_tx,
        config.eviction_period,
    ));

    let (source_tx, source_rx) = mpsc::channel(256);
    let (raw_tx, raw_rx) = mpsc::channel(256);
    let mux = Arc::new(SourceMux::new(["file".to_string(), "url".to_string(), "sink".to_string()]));

    let mux_task = {
        let mux = mux.clone();
        let source_tx = source_tx.clone();
        tokio::spawn(async move {
            let mut raw_rx = raw_rx;
            nodeagentd::supervise::supervise("source-mux", || async {
                while let Some(update) = raw_rx.recv().await {
                    for normalized in mux.process(update) {
                        if source_tx.send(normalized).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Ok(())
            })
            .await;
        })
    };

    let file_source_task = {
        let tx = raw_tx.clone();
        let cancel = cancel.clone();
        let source = FileSource::new(config.static_pod_dir.clone(), config.source_poll_period);
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("source-file", move || {
                let source = source.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                async move { Box::new(source).run(tx, cancel).await }
            })
            .await;
        })
    };

    let url_source_task = config.static_pod_url.clone().map(|endpoint| {
        let tx = raw_tx.clone();
        let cancel = cancel.clone();
        let source = UrlSource::new(endpoint, config.source_poll_period);
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("source-url", move || {
                let source = source.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                async move { Box::new(source).run(tx, cancel).await }
            })
            .await;
        })
    });

    let sink_source_task = {
        let tx = raw_tx.clone();
        let cancel = cancel.clone();
        let source = SinkWatchSource::new(config.sink_url.clone(), config.node_name.clone());
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("source-sink", move || {
                let source = source.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                async move { Box::new(source).run(tx, cancel).await }
            })
            .await;
        })
    };
    drop(raw_tx);

    let pleg_task = {
        let pleg = pleg.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pleg.run(cancel).await;
        })
    };

    let status_task = {
        let status_manager = status_manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("status-manager", move || {
                let status_manager = status_manager.clone();
                let cancel = cancel.clone();
                async move { status_manager.run(cancel).await }
            })
            .await;
        })
    };

    let eviction_task = {
        let eviction_manager = eviction_manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("eviction-manager", move || {
                let eviction_manager = eviction_manager.clone();
                let cancel = cancel.clone();
                async move { eviction_manager.run(cancel).await }
            })
            .await;
        })
    };

    let cache_ticker_task = {
        let cache = cache.clone();
        let cancel = cancel.clone();
        let period = config.cache_tick_period;
        tokio::spawn(async move {
            nodeagentd::supervise::supervise("cache-ticker", move || {
                let cache = cache.clone();
                let cancel = cancel.clone();
                async move {
                    let mut tick = tokio::time::interval(period);
                    loop {
                        tokio::select! {
                            _ = tick.tick() => cache.update_time(chrono::Utc::now()),
                            _ = cancel.cancelled() => return Ok(()),
                        }
                    }
                }
            })
            .await;
        })
    };

    let mirror_task = {
        let mirror_manager = mirror_manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut mirror_rx = mirror_rx;
            nodeagentd::supervise::supervise("mirror-manager", || async {
                mirror_manager.run(&mut mirror_rx, cancel.clone()).await;
                Ok(())
            })
            .await;
        })
    };

    let mut dispatcher = Dispatcher::new(
        pod_manager.clone(),
        cache.clone(),
        runtime.clone(),
        status_manager.clone(),
        probe_store.clone(),
        backoff.clone(),
        prober,
        mirror_tx,
        config.dispatcher_tick_period,
    );
    let dispatcher_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut dispatcher = dispatcher;
            let mut source_rx = source_rx;
            let mut pleg_event_rx = pleg_event_rx;
            let mut probe_kill_rx = probe_kill_rx;
            let mut eviction_rx = eviction_rx;
            nodeagentd::supervise::supervise("dispatcher", || async {
                dispatcher
                    .run(
                        &mut source_rx,
                        &mut pleg_event_rx,
                        &mut probe_kill_rx,
                        &mut eviction_rx,
                        cancel.clone(),
                    )
                    .await;
                Ok(())
            })
            .await;
        })
    };

    let shutdown_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            cancel.cancel();
        })
    };

    let mut handles = vec![
        mux_task,
        file_source_task,
        sink_source_task,
        pleg_task,
        status_task,
        eviction_task,
        cache_ticker_task,
        mirror_task,
        dispatcher_task,
        shutdown_task,
    ];
    if let Some(task) = url_source_task {
        handles.push(task);
    }

    for handle in handles {
        handle.await.map_err(|e| format!("task join failed: {e}"))?;
    }

    Ok(())
}
