//! Generic (relisting) PLEG (§4.F).
//!
//! Grounded in the teacher's `sync::run` shape: a fixed-period `tokio::time::
//! interval`, one full pass over runtime state per tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::PodCache;
use crate::runtime::RuntimeClient;
use crate::types::event::{LifecycleEvent, LifecycleEventKind};
use crate::types::pod::PodUid;
use crate::types::runtime::{ContainerState, RuntimePodStatus};

pub struct GenericPleg {
    runtime: Arc<dyn RuntimeClient>,
    cache: Arc<PodCache>,
    event_tx: mpsc::Sender<LifecycleEvent>,
    relist_period: Duration,
    active: Arc<AtomicBool>,
    prior: Mutex<HashMap<PodUid, RuntimePodStatus>>,
    last_relist: Mutex<Instant>,
}

impl GenericPleg {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        cache: Arc<PodCache>,
        event_tx: mpsc::Sender<LifecycleEvent>,
        relist_period: Duration,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            runtime,
            cache,
            event_tx,
            relist_period,
            active,
            prior: Mutex::new(HashMap::new()),
            last_relist: Mutex::new(Instant::now()),
        }
    }

    pub fn healthy(&self, threshold: Duration) -> bool {
        self.last_relist.lock().unwrap().elapsed() < threshold
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        tracing::info!("starting generic PLEG");
        let mut interval = tokio::time::interval(self.relist_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => return Ok(()),
            }

            match self.runtime.list_pod_sandboxes(&cancel).await {
                Ok(list) => {
                    *self.last_relist.lock().unwrap() = Instant::now();
                    if self.active.load(Ordering::SeqCst) {
                        self.relist(list).await;
                    } else {
                        // Keep our own prior snapshot current even while dormant
                        // so a promotion to active doesn't emit a flood of
                        // false diffs against stale state.
                        let mut prior = self.prior.lock().unwrap();
                        *prior = list.into_iter().collect();
                    }
                }
                Err(err) => tracing::warn!(error = %err, "generic PLEG: relist failed"),
            }
        }
    }

    async fn relist(&self, list: Vec<(PodUid, RuntimePodStatus)>) {
        let now = Utc::now();
        let mut prior = self.prior.lock().unwrap();
        let seen: std::collections::HashSet<PodUid> = list.iter().map(|(uid, _)| *uid).collect();

        for (uid, status) in &list {
            let old = prior.get(uid);
            for event in diff_containers(old, status) {
                let _ = self.event_tx.try_send(event);
            }
            let _ = self.event_tx.try_send(LifecycleEvent::pod_sync(*uid));
            self.cache.set(*uid, Some(status.clone()), None, now);
        }
        for uid in prior.keys() {
            if !seen.contains(uid) {
                let _ = self.event_tx.try_send(LifecycleEvent {
                    pod_uid: *uid,
                    container_id: None,
                    kind: LifecycleEventKind::PodSync,
                });
            }
        }

        *prior = list.into_iter().collect();
        drop(prior);
        self.cache.update_time(now);
    }
}

fn diff_containers(old: Option<&RuntimePodStatus>, new: &RuntimePodStatus) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    let empty = Vec::new();
    let old_containers = old.map(|s| &s.containers).unwrap_or(&empty);

    for c in &new.containers {
        match old_containers.iter().find(|oc| oc.id == c.id) {
            None => events.push(LifecycleEvent {
                pod_uid: new.pod_uid,
                container_id: Some(c.id.clone()),
                kind: LifecycleEventKind::ContainerStarted,
            }),
            Some(oc) if oc.state != c.state => {
                let kind = if c.state == ContainerState::Exited {
                    LifecycleEventKind::ContainerDied
                } else {
                    LifecycleEventKind::ContainerChanged
                };
                events.push(LifecycleEvent {
                    pod_uid: new.pod_uid,
                    container_id: Some(c.id.clone()),
                    kind,
                });
            }
            Some(_) => {}
        }
    }
    for oc in old_containers {
        if !new.containers.iter().any(|c| c.id == oc.id) {
            events.push(LifecycleEvent {
                pod_uid: new.pod_uid,
                container_id: Some(oc.id.clone()),
                kind: LifecycleEventKind::ContainerRemoved,
            });
        }
    }
    events
}
