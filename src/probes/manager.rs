//! Prober manager (§4.H): one worker per (pod, container, probe-kind).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::PodCache;
use crate::probes::exec::execute_probe;
use crate::probes::store::{ProbeResult, ProbeResultStore};
use crate::runtime::RuntimeClient;
use crate::types::pod::{ContainerSpec, ProbeKind, ProbeSpec};
use crate::types::runtime::ContainerState;
use crate::types::PodUid;

/// Kill request routed to the dispatcher (§4.J) when a liveness/startup
/// probe fails.
#[derive(Debug, Clone)]
pub struct ProbeKillRequest {
    pub pod_uid: PodUid,
    pub container_name: String,
    pub reason: KillReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    LivenessProbe,
    StartupProbe,
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct WorkerKey {
    pod_uid: PodUid,
    container: String,
    kind: ProbeKind,
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the registry of running probe workers; not `Sync`-shared directly —
/// callers hold it behind their own task and drive it from `sync_pod`/
/// `stop_pod` calls, matching the teacher's single-owner worker-registry
/// convention (§5 "Per-pod worker state: owned by the dispatcher's
/// registry").
pub struct ProberManager {
    cache: Arc<PodCache>,
    store: Arc<ProbeResultStore>,
    runtime: Arc<dyn RuntimeClient>,
    kill_tx: mpsc::Sender<ProbeKillRequest>,
    workers: HashMap<WorkerKey, WorkerHandle>,
}

impl ProberManager {
    pub fn new(
        cache: Arc<PodCache>,
        store: Arc<ProbeResultStore>,
        runtime: Arc<dyn RuntimeClient>,
        kill_tx: mpsc::Sender<ProbeKillRequest>,
    ) -> Self {
        Self {
            cache,
            store,
            runtime,
            kill_tx,
            workers: HashMap::new(),
        }
    }

    /// Ensures exactly one worker exists per declared probe on `container`,
    /// spawning new ones and leaving unrelated ones untouched.
    pub fn sync_container(&mut self, pod_uid: PodUid, container: &ContainerSpec) {
        for (kind, spec) in [
            (ProbeKind::Startup, &container.startup_probe),
            (ProbeKind::Readiness, &container.readiness_probe),
            (ProbeKind::Liveness, &container.liveness_probe),
        ] {
            let key = WorkerKey {
                pod_uid,
                container: container.name.clone(),
                kind,
            };
            let Some(spec) = spec else {
                self.stop_worker(&key);
                continue;
            };
            if self.workers.contains_key(&key) {
                continue;
            }
            self.spawn_worker(key, spec.clone());
        }
    }

    fn spawn_worker(&mut self, key: WorkerKey, spec: ProbeSpec) {
        let cancel = CancellationToken::new();
        let cache = self.cache.clone();
        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let kill_tx = self.kill_tx.clone();
        let worker_cancel = cancel.clone();
        let (pod_uid, container, kind) = (key.pod_uid, key.container.clone(), key.kind);
        let join = tokio::spawn(async move {
            run_probe_worker(pod_uid, container, kind, spec, runtime, cache, store, kill_tx, worker_cancel).await;
        });
        self.workers.insert(key, WorkerHandle { cancel, join });
    }

    fn stop_worker(&mut self, key: &WorkerKey) {
        if let Some(handle) = self.workers.remove(key) {
            handle.cancel.cancel();
            handle.join.abort();
        }
    }

    /// Pod deletion requested (§4.H): force liveness/startup results to
    /// Success for quiet shutdown, then stop every worker for this pod.
    pub fn stop_pod(&mut self, pod_uid: PodUid) {
        let keys: Vec<WorkerKey> = self
            .workers
            .keys()
            .filter(|k| k.pod_uid == pod_uid)
            .cloned()
            .collect();
        for key in &keys {
            if matches!(key.kind, ProbeKind::Liveness | ProbeKind::Startup) {
                self.store.set(pod_uid, &key.container, key.kind, ProbeResult::Success);
            }
        }
        for key in keys {
            self.stop_worker(&key);
        }
    }
}

async fn run_probe_worker(
    pod_uid: PodUid,
    container_name: String,
    kind: ProbeKind,
    spec: ProbeSpec,
    runtime: Arc<dyn RuntimeClient>,
    cache: Arc<PodCache>,
    store: Arc<ProbeResultStore>,
    kill_tx: mpsc::Sender<ProbeKillRequest>,
    cancel: CancellationToken,
) {
    store.set(pod_uid, &container_name, kind, ProbeResult::initial_value(kind));

    let mut current_container_id: Option<String> = None;
    let mut consecutive_successes: u32 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut on_hold = false;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(spec.initial_delay_seconds)) => {}
        _ = cancel.cancelled() => return,
    }

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let Some(entry) = cache.get(pod_uid) else {
            sleep_with_jitter(spec.period_seconds, &cancel).await;
            continue;
        };
        let Some(status) = entry.status else {
            sleep_with_jitter(spec.period_seconds, &cancel).await;
            continue;
        };
        let Some(container) = status.container(&container_name) else {
            sleep_with_jitter(spec.period_seconds, &cancel).await;
            continue;
        };

        if current_container_id.as_deref() != Some(container.id.as_str()) {
            // New container ID: clear on-hold, reset thresholds, reset to initial value.
            current_container_id = Some(container.id.clone());
            consecutive_successes = 0;
            consecutive_failures = 0;
            on_hold = false;
            store.set(pod_uid, &container_name, kind, ProbeResult::initial_value(kind));
        }

        if container.state != ContainerState::Running {
            sleep_with_jitter(spec.period_seconds, &cancel).await;
            continue;
        }

        if on_hold {
            sleep_with_jitter(spec.period_seconds, &cancel).await;
            continue;
        }

        // Startup probe governs readiness/liveness: block until it succeeds.
        if kind != ProbeKind::Startup {
            let startup_done = store.get(pod_uid, &container_name, ProbeKind::Startup);
            if matches!(startup_done, Some(ProbeResult::Success)) || startup_done.is_none() {
                // no startup probe registered (None) or it already succeeded
            } else {
                sleep_with_jitter(spec.period_seconds, &cancel).await;
                continue;
            }
        }

        let pod_ip = status.ip.clone();
        let succeeded = execute_probe(runtime.as_ref(), &container.id, pod_ip.as_deref(), &spec, &cancel).await;

        if succeeded {
            consecutive_successes += 1;
            consecutive_failures = 0;
            if consecutive_successes >= spec.success_threshold {
                store.set(pod_uid, &container_name, kind, ProbeResult::Success);
            }
        } else {
            consecutive_failures += 1;
            consecutive_successes = 0;
            if consecutive_failures >= spec.failure_threshold {
                store.set(pod_uid, &container_name, kind, ProbeResult::Failure);
                if matches!(kind, ProbeKind::Liveness | ProbeKind::Startup) {
                    on_hold = true;
                    let reason = if kind == ProbeKind::Liveness {
                        KillReason::LivenessProbe
                    } else {
                        KillReason::StartupProbe
                    };
                    let _ = kill_tx
                        .send(ProbeKillRequest {
                            pod_uid,
                            container_name: container_name.clone(),
                            reason,
                        })
                        .await;
                }
            }
        }

        sleep_with_jitter(spec.period_seconds, &cancel).await;
    }
}

async fn sleep_with_jitter(period_seconds: u64, cancel: &CancellationToken) {
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    let duration = Duration::from_secs(period_seconds) + Duration::from_millis(jitter_ms);
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
