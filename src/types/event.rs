//! PLEG lifecycle events (§3 DATA MODEL: "Lifecycle event").

use serde::{Deserialize, Serialize};

use super::pod::PodUid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub pod_uid: PodUid,
    pub container_id: Option<String>,
    pub kind: LifecycleEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    ContainerStarted,
    ContainerDied,
    ContainerRemoved,
    ContainerChanged,
    PodSync,
}

impl LifecycleEvent {
    pub fn pod_sync(pod_uid: PodUid) -> Self {
        Self {
            pod_uid,
            container_id: None,
            kind: LifecycleEventKind::PodSync,
        }
    }
}
