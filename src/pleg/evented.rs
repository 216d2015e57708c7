//! Evented PLEG (§4.F): subscribes to the runtime's streamed container
//! events, the same consumption shape as the teacher's `controller::watch`
//! but sourced from `RuntimeClient::container_events` instead of an HTTP
//! NDJSON stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::PodCache;
use crate::runtime::RuntimeClient;
use crate::types::event::{LifecycleEvent, LifecycleEventKind};
use crate::types::runtime::{ContainerEvent, ContainerEventType};

pub struct EventedPleg {
    runtime: Arc<dyn RuntimeClient>,
    cache: Arc<PodCache>,
    event_tx: mpsc::Sender<LifecycleEvent>,
    update_tick_period: Duration,
    max_stream_retries: u32,
    active: Arc<AtomicBool>,
}

impl EventedPleg {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        cache: Arc<PodCache>,
        event_tx: mpsc::Sender<LifecycleEvent>,
        update_tick_period: Duration,
        max_stream_retries: u32,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            runtime,
            cache,
            event_tx,
            update_tick_period,
            max_stream_retries,
            active,
        }
    }

    pub fn healthy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        tracing::info!("starting evented PLEG");
        self.active.store(true, Ordering::SeqCst);
        let result = self.run_inner(&cancel).await;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<(), String> {
        let mut consecutive_failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.runtime.container_events(cancel).await {
                Ok(stream) => match self.consume(stream, cancel).await {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        consecutive_failures += 1;
                        tracing::warn!(error = %err, attempt = consecutive_failures, "evented PLEG stream error");
                    }
                },
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(error = %err, attempt = consecutive_failures, "evented PLEG: failed to subscribe");
                }
            }

            if consecutive_failures >= self.max_stream_retries {
                tracing::error!(
                    attempts = consecutive_failures,
                    "evented PLEG exceeded max consecutive failures, falling back to generic relister for remainder of process lifetime"
                );
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn consume(
        &self,
        mut stream: futures_util::stream::BoxStream<
            'static,
            Result<ContainerEvent, crate::types::runtime::RuntimeError>,
        >,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let mut tick = tokio::time::interval(self.update_tick_period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.cache.update_time(Utc::now());
                }
                item = stream.next() => {
                    match item {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(err)) => return Err(err.to_string()),
                        None => return Err("container event stream ended".to_string()),
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    fn handle_event(&self, event: ContainerEvent) {
        let Some(status) = event.updated_status else {
            return;
        };
        let now = Utc::now();
        let kind = match event.event_type {
            ContainerEventType::Created => LifecycleEventKind::ContainerChanged,
            ContainerEventType::Started => LifecycleEventKind::ContainerStarted,
            ContainerEventType::Stopped => LifecycleEventKind::ContainerDied,
            ContainerEventType::Deleted => LifecycleEventKind::ContainerRemoved,
        };
        let pod_uid = status.pod_uid;
        self.cache.set(pod_uid, Some(status), None, now);
        let _ = self.event_tx.try_send(LifecycleEvent {
            pod_uid,
            container_id: Some(event.container_id),
            kind,
        });
    }
}
