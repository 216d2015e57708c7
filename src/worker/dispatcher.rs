//! Dispatcher (§4.J): the single task that owns the per-pod worker
//! registry and the prober manager, fed by four independent upstreams.
//!
//! Grounded in the teacher's `controller::run` + `worker::run` pairing (one
//! channel consumed by a loop that fans work out to per-item tasks), widened
//! to four upstreams and a persistent per-UID worker instead of a
//! fire-and-forget spawn per message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffStore;
use crate::cache::PodCache;
use crate::eviction::EvictionOrder;
use crate::mirror::MirrorCommand;
use crate::pod_manager::PodManager;
use crate::probes::manager::{ProbeKillRequest, ProberManager};
use crate::probes::store::ProbeResultStore;
use crate::runtime::RuntimeClient;
use crate::sources::{Op, SourceUpdate};
use crate::status::StatusManager;
use crate::types::event::LifecycleEvent;
use crate::types::pod::PodUid;

use super::mailbox::Mailbox;
use super::podworker::{self, PodWorkerContext};
use super::{UpdateRecord, UpdateType};

struct WorkerHandle {
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
}

pub struct Dispatcher {
    pod_manager: Arc<PodManager>,
    cache: Arc<PodCache>,
    runtime: Arc<dyn RuntimeClient>,
    status_manager: Arc<StatusManager>,
    probe_store: Arc<ProbeResultStore>,
    backoff: Arc<BackoffStore>,
    prober: ProberManager,
    workers: HashMap<PodUid, WorkerHandle>,
    reaped_tx: mpsc::Sender<PodUid>,
    reaped_rx: mpsc::Receiver<PodUid>,
    mirror_tx: mpsc::Sender<MirrorCommand>,
    tick_period: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pod_manager: Arc<PodManager>,
        cache: Arc<PodCache>,
        runtime: Arc<dyn RuntimeClient>,
        status_manager: Arc<StatusManager>,
        probe_store: Arc<ProbeResultStore>,
        backoff: Arc<BackoffStore>,
        prober: ProberManager,
        mirror_tx: mpsc::Sender<MirrorCommand>,
        tick_period: Duration,
    ) -> Self {
        let (reaped_tx, reaped_rx) = mpsc::channel(64);
        Self {
            pod_manager,
            cache,
            runtime,
            status_manager,
            probe_store,
            backoff,
            prober,
            workers: HashMap::new(),
            reaped_tx,
            reaped_rx,
            mirror_tx,
            tick_period,
        }
    }

    /// Runs until `cancel` fires. Consumes normalized pod source updates,
    /// PLEG lifecycle events, probe kill requests and eviction orders; one
    /// per-pod worker is spawned lazily on first mention of a UID.
    ///
    /// Takes `&mut self` and `&mut` receivers (rather than consuming them) so
    /// a caller can restart this loop via [`crate::supervise::supervise`]
    /// after a panic without losing the worker registry or any channel.
    pub async fn run(
        &mut self,
        source_rx: &mut mpsc::Receiver<SourceUpdate>,
        pleg_rx: &mut mpsc::Receiver<LifecycleEvent>,
        probe_kill_rx: &mut mpsc::Receiver<ProbeKillRequest>,
        eviction_rx: &mut mpsc::Receiver<EvictionOrder>,
        cancel: CancellationToken,
    ) {
        tracing::info!("starting dispatcher");
        let mut tick = tokio::time::interval(self.tick_period);
        loop {
            tokio::select! {
                Some(update) = source_rx.recv() => self.handle_source_update(update),
                Some(event) = pleg_rx.recv() => self.handle_pleg_event(event),
                Some(req) = probe_kill_rx.recv() => self.handle_probe_kill(req),
                Some(order) = eviction_rx.recv() => self.handle_eviction_order(order),
                Some(uid) = self.reaped_rx.recv() => self.handle_reaped(uid),
                _ = tick.tick() => self.handle_tick(),
                _ = cancel.cancelled() => {
                    for (_, handle) in self.workers.drain() {
                        handle.cancel.cancel();
                    }
                    return;
                }
            }
        }
    }

    fn handle_source_update(&mut self, update: SourceUpdate) {
        match update.op {
            Op::Add | Op::Update => {
                let update_type = if update.op == Op::Add {
                    UpdateType::Create
                } else {
                    UpdateType::Update
                };
                for pod in update.pods {
                    self.pod_manager.add(pod.clone());
                    for c in pod.spec.containers.iter().chain(pod.spec.ephemeral_containers.iter()) {
                        self.prober.sync_container(pod.uid, c);
                    }
                    if !pod.mirror && pod.config_hash().is_some() {
                        let _ = self.mirror_tx.try_send(MirrorCommand::Upsert(pod.clone()));
                    }
                    self.dispatch(UpdateRecord::new(pod.uid, update_type, Utc::now()));
                }
            }
            Op::Delete | Op::Remove => {
                for pod in update.pods {
                    let grace = Duration::from_secs(pod.spec.termination_grace_period_seconds);
                    if !pod.mirror && pod.config_hash().is_some() {
                        let _ = self.mirror_tx.try_send(MirrorCommand::Delete(pod.full_name()));
                    }
                    self.dispatch(UpdateRecord::new(pod.uid, UpdateType::Terminate, Utc::now()).with_grace(grace));
                }
            }
            Op::Reconcile => {
                for pod in update.pods {
                    self.dispatch(UpdateRecord::new(pod.uid, UpdateType::Sync, Utc::now()));
                }
            }
            Op::Set => {
                tracing::error!("dispatcher received raw Set update; mux should have resolved it");
            }
        }
    }

    fn handle_pleg_event(&mut self, event: LifecycleEvent) {
        self.dispatch(UpdateRecord::new(event.pod_uid, UpdateType::Sync, Utc::now()));
    }

    fn handle_probe_kill(&mut self, req: ProbeKillRequest) {
        let reason = format!("{:?} probe failed on container {}", req.reason, req.container_name);
        self.dispatch(UpdateRecord::new(req.pod_uid, UpdateType::Sync, Utc::now()).with_reason(reason));
    }

    fn handle_eviction_order(&mut self, order: EvictionOrder) {
        self.dispatch(
            UpdateRecord::new(order.pod_uid, UpdateType::Terminate, Utc::now())
                .with_grace(order.grace_override)
                .with_reason("eviction: node under resource pressure"),
        );
    }

    fn handle_reaped(&mut self, uid: PodUid) {
        self.prober.stop_pod(uid);
        if let Some(handle) = self.workers.remove(&uid) {
            handle.cancel.cancel();
        }
    }

    fn handle_tick(&mut self) {
        for pod in self.pod_manager.get_pods() {
            if self.workers.contains_key(&pod.uid) {
                self.dispatch(UpdateRecord::new(pod.uid, UpdateType::Sync, Utc::now()));
            }
        }
    }

    fn dispatch(&mut self, record: UpdateRecord) {
        let mailbox = self.get_or_spawn(record.uid);
        mailbox.send(record);
    }

    fn get_or_spawn(&mut self, uid: PodUid) -> Arc<Mailbox> {
        if let Some(handle) = self.workers.get(&uid) {
            return handle.mailbox.clone();
        }

        let mailbox = Arc::new(Mailbox::new());
        let cancel = CancellationToken::new();
        let ctx = PodWorkerContext {
            uid,
            cache: self.cache.clone(),
            pod_manager: self.pod_manager.clone(),
            runtime: self.runtime.clone(),
            status_manager: self.status_manager.clone(),
            probe_store: self.probe_store.clone(),
            backoff: self.backoff.clone(),
            mailbox: mailbox.clone(),
            reaped_tx: self.reaped_tx.clone(),
        };
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
            crate::supervise::supervise(&format!("pod-worker-{uid}"), move || {
                let ctx = ctx.clone();
                let cancel = worker_cancel.clone();
                async move {
                    podworker::run(ctx, cancel).await;
                    Ok(())
                }
            })
            .await;
        });
        self.workers.insert(
            uid,
            WorkerHandle {
                mailbox: mailbox.clone(),
                cancel,
            },
        );
        mailbox
    }
}
