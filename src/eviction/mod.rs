//! Eviction manager (§4.I): periodic threshold engine over node signals.
//!
//! Shaped like the teacher's `sync::run` — a fixed-period tick over a
//! snapshot — but the snapshot is node pressure signals rather than pod
//! runtimes, and the action is a single kill order rather than a status
//! push.

pub mod signals;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pod_manager::PodManager;
use crate::types::pod::{Pod, PodUid, QosClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    MemoryAvailable,
    NodeFsAvailable,
    ImageFsAvailable,
    InodesFree,
    PidsFree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    LessThan,
    LessOrEqual,
}

#[derive(Debug, Clone)]
pub struct Threshold {
    pub signal: Signal,
    pub op: ThresholdOp,
    /// Bytes for memory/disk signals, a count for inode/pid signals.
    pub value: u64,
    pub grace_period: Duration,
    /// Hard thresholds act immediately (grace override = 0); soft
    /// thresholds require `grace_period` of continuous breach first.
    pub hard: bool,
}

impl Threshold {
    fn exceeded(&self, current: u64) -> bool {
        match self.op {
            ThresholdOp::LessThan => current < self.value,
            ThresholdOp::LessOrEqual => current <= self.value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeSignals {
    pub memory_available_bytes: u64,
    pub nodefs_available_bytes: u64,
    pub imagefs_available_bytes: u64,
    pub inodes_free: u64,
    pub pids_free: u64,
}

impl NodeSignals {
    fn value_for(&self, signal: Signal) -> u64 {
        match signal {
            Signal::MemoryAvailable => self.memory_available_bytes,
            Signal::NodeFsAvailable => self.nodefs_available_bytes,
            Signal::ImageFsAvailable => self.imagefs_available_bytes,
            Signal::InodesFree => self.inodes_free,
            Signal::PidsFree => self.pids_free,
        }
    }
}

#[async_trait]
pub trait NodeSignalSource: Send + Sync {
    async fn read(&self) -> NodeSignals;
}

#[async_trait]
pub trait PodUsageSource: Send + Sync {
    /// Observed memory usage per pod, in bytes.
    async fn read(&self) -> HashMap<PodUid, u64>;
}

#[derive(Debug, Clone)]
pub struct EvictionOrder {
    pub pod_uid: PodUid,
    /// `min(soft-eviction-grace, pod-grace)` per spec.md §9 open question;
    /// zero for hard thresholds.
    pub grace_override: Duration,
}

struct Candidate {
    pod: Pod,
    qos: QosClass,
    overage: i128,
    protected: bool,
}

fn qos_rank(qos: QosClass) -> u8 {
    match qos {
        QosClass::BestEffort => 0,
        QosClass::Burstable => 1,
        QosClass::Guaranteed => 2,
    }
}

/// A pod admitted through the file/URL static sources carries a
/// `config-hash` annotation (see `sources::file`/`sources::url`); that is
/// this implementation's signal for "protect from eviction like a static
/// pod" since the desired-pod model doesn't otherwise distinguish origin.
fn is_protected(pod: &Pod) -> bool {
    pod.config_hash().is_some()
}

pub struct EvictionManager {
    thresholds: Vec<Threshold>,
    signal_source: Arc<dyn NodeSignalSource>,
    usage_source: Arc<dyn PodUsageSource>,
    pod_manager: Arc<PodManager>,
    kill_tx: mpsc::Sender<EvictionOrder>,
    period: Duration,
    exceeded_since: Mutex<HashMap<Signal, Instant>>,
    under_pressure: AtomicBool,
    evicted: Mutex<HashMap<PodUid, Instant>>,
}

impl EvictionManager {
    pub fn new(
        thresholds: Vec<Threshold>,
        signal_source: Arc<dyn NodeSignalSource>,
        usage_source: Arc<dyn PodUsageSource>,
        pod_manager: Arc<PodManager>,
        kill_tx: mpsc::Sender<EvictionOrder>,
        period: Duration,
    ) -> Self {
        Self {
            thresholds,
            signal_source,
            usage_source,
            pod_manager,
            kill_tx,
            period,
            exceeded_since: Mutex::new(HashMap::new()),
            under_pressure: AtomicBool::new(false),
            evicted: Mutex::new(HashMap::new()),
        }
    }

    /// Whether admission should currently refuse new pods (§4.I.6).
    pub fn under_pressure(&self) -> bool {
        self.under_pressure.load(Ordering::SeqCst)
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        tracing::info!("starting eviction manager");
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn tick(&self) {
        let signals = self.signal_source.read().await;
        let actionable = self.actionable_thresholds(&signals);

        self.under_pressure.store(!actionable.is_empty(), Ordering::SeqCst);
        let Some(threshold) = actionable.into_iter().next() else {
            return;
        };

        let candidates = self.rank_candidates().await;
        let Some(victim) = candidates.into_iter().next() else {
            tracing::warn!("eviction threshold breached but no candidate pods available");
            return;
        };

        let pod_grace = Duration::from_secs(victim.pod.spec.termination_grace_period_seconds);
        let grace_override = if threshold.hard {
            Duration::ZERO
        } else {
            threshold.grace_period.min(pod_grace)
        };

        tracing::warn!(
            pod_uid = %victim.pod.uid,
            signal = ?threshold.signal,
            qos = ?victim.qos,
            "evicting pod under resource pressure"
        );
        if self
            .kill_tx
            .send(EvictionOrder {
                pod_uid: victim.pod.uid,
                grace_override,
            })
            .await
            .is_ok()
        {
            self.evicted.lock().unwrap().insert(victim.pod.uid, Instant::now());
        }
    }

    fn actionable_thresholds(&self, signals: &NodeSignals) -> Vec<Threshold> {
        let mut exceeded_since = self.exceeded_since.lock().unwrap();
        let mut actionable = Vec::new();
        for threshold in &self.thresholds {
            let value = signals.value_for(threshold.signal);
            if threshold.exceeded(value) {
                let since = *exceeded_since.entry(threshold.signal).or_insert_with(Instant::now);
                if threshold.hard || since.elapsed() >= threshold.grace_period {
                    actionable.push(threshold.clone());
                }
            } else {
                exceeded_since.remove(&threshold.signal);
            }
        }
        actionable
    }

    async fn rank_candidates(&self) -> Vec<Candidate> {
        let pods = self.pod_manager.get_pods();
        let usage = self.usage_source.read().await;

        let mut candidates: Vec<Candidate> = pods
            .into_iter()
            .map(|pod| {
                let used = usage.get(&pod.uid).copied().unwrap_or(0) as i128;
                let requested = pod
                    .spec
                    .containers
                    .iter()
                    .filter_map(|c| c.resources.requests.as_ref().and_then(|r| r.memory_bytes))
                    .sum::<u64>() as i128;
                Candidate {
                    qos: pod.qos_class(),
                    overage: used - requested,
                    protected: is_protected(&pod),
                    pod,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.protected
                .cmp(&b.protected)
                .then(qos_rank(a.qos).cmp(&qos_rank(b.qos)))
                .then(b.overage.cmp(&a.overage))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pod::{ContainerSpec, PodSpec, ResourceList, ResourceRequirements, RestartPolicy};
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    struct FixedSignals(NodeSignals);

    #[async_trait]
    impl NodeSignalSource for FixedSignals {
        async fn read(&self) -> NodeSignals {
            self.0.clone()
        }
    }

    struct FixedUsage(HashMap<PodUid, u64>);

    #[async_trait]
    impl PodUsageSource for FixedUsage {
        async fn read(&self) -> HashMap<PodUid, u64> {
            self.0.clone()
        }
    }

    fn pod(uid: PodUid, name: &str, memory_request_bytes: Option<u64>) -> Pod {
        Pod {
            uid,
            namespace: "default".to_string(),
            name: name.to_string(),
            mirror: false,
            annotations: StdHashMap::new(),
            spec: PodSpec {
                containers: vec![ContainerSpec {
                    name: "c1".to_string(),
                    image: "img:v1".to_string(),
                    env: vec![],
                    resources: ResourceRequirements {
                        requests: memory_request_bytes.map(|m| ResourceList {
                            cpu_millis: None,
                            memory_bytes: Some(m),
                        }),
                        limits: None,
                    },
                    startup_probe: None,
                    readiness_probe: None,
                    liveness_probe: None,
                }],
                restart_policy: RestartPolicy::Always,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn hard_threshold_evicts_bestEffort_only() {
        let pod_manager = Arc::new(PodManager::new());
        let best_effort = Uuid::new_v4();
        let guaranteed = Uuid::new_v4();
        pod_manager.add(pod(best_effort, "pB", None));
        pod_manager.add(pod(guaranteed, "pG", Some(500 * 1024 * 1024)));

        let mut usage = HashMap::new();
        usage.insert(best_effort, 1024 * 1024 * 1024);
        usage.insert(guaranteed, 500 * 1024 * 1024);

        let (tx, mut rx) = mpsc::channel(4);
        let manager = EvictionManager::new(
            vec![Threshold {
                signal: Signal::MemoryAvailable,
                op: ThresholdOp::LessThan,
                value: 100 * 1024 * 1024,
                grace_period: Duration::ZERO,
                hard: true,
            }],
            Arc::new(FixedSignals(NodeSignals {
                memory_available_bytes: 50 * 1024 * 1024,
                ..Default::default()
            })),
            Arc::new(FixedUsage(usage)),
            pod_manager,
            tx,
            Duration::from_secs(10),
        );

        manager.tick().await;

        let order = rx.try_recv().expect("expected exactly one eviction order");
        assert_eq!(order.pod_uid, best_effort);
        assert_eq!(order.grace_override, Duration::ZERO);
        assert!(rx.try_recv().is_err(), "at most one victim per pass");
    }

    #[tokio::test]
    async fn soft_threshold_requires_grace_period() {
        let pod_manager = Arc::new(PodManager::new());
        let uid = Uuid::new_v4();
        pod_manager.add(pod(uid, "pB", None));

        let mut usage = HashMap::new();
        usage.insert(uid, 1024 * 1024 * 1024);

        let (tx, mut rx) = mpsc::channel(4);
        let manager = EvictionManager::new(
            vec![Threshold {
                signal: Signal::MemoryAvailable,
                op: ThresholdOp::LessThan,
                value: 100 * 1024 * 1024,
                grace_period: Duration::from_secs(60),
                hard: false,
            }],
            Arc::new(FixedSignals(NodeSignals {
                memory_available_bytes: 50 * 1024 * 1024,
                ..Default::default()
            })),
            Arc::new(FixedUsage(usage)),
            pod_manager,
            tx,
            Duration::from_secs(10),
        );

        manager.tick().await;
        assert!(rx.try_recv().is_err(), "soft threshold not yet actionable");
        assert!(manager.under_pressure());
    }
}
