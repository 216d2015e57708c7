//! Probe result store (§4.C): last observed result per container, one map
//! per probe kind. Written only by probe workers; read by status assembly
//! and the sync loop.

use dashmap::DashMap;

use crate::types::pod::ProbeKind;
use crate::types::PodUid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Success,
    Failure,
    Unknown,
}

impl ProbeResult {
    pub fn initial_value(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::Readiness => ProbeResult::Failure,
            ProbeKind::Liveness => ProbeResult::Success,
            ProbeKind::Startup => ProbeResult::Unknown,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Key {
    pod_uid: PodUid,
    container: String,
    kind: ProbeKind,
}

#[derive(Default)]
pub struct ProbeResultStore {
    results: DashMap<Key, ProbeResult>,
}

impl ProbeResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pod_uid: PodUid, container: &str, kind: ProbeKind, result: ProbeResult) {
        self.results.insert(
            Key {
                pod_uid,
                container: container.to_string(),
                kind,
            },
            result,
        );
    }

    pub fn get(&self, pod_uid: PodUid, container: &str, kind: ProbeKind) -> Option<ProbeResult> {
        self.results
            .get(&Key {
                pod_uid,
                container: container.to_string(),
                kind,
            })
            .map(|r| *r)
    }

    pub fn clear_container(&self, pod_uid: PodUid, container: &str) {
        for kind in [ProbeKind::Startup, ProbeKind::Readiness, ProbeKind::Liveness] {
            self.set(pod_uid, container, kind, ProbeResult::initial_value(kind));
        }
    }

    pub fn forget_pod(&self, pod_uid: PodUid) {
        self.results.retain(|k, _| k.pod_uid != pod_uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_defaults_to_none_until_set() {
        let store = ProbeResultStore::new();
        let uid = uuid::Uuid::new_v4();
        assert_eq!(store.get(uid, "c1", ProbeKind::Liveness), None);
        store.set(uid, "c1", ProbeKind::Liveness, ProbeResult::Success);
        assert_eq!(store.get(uid, "c1", ProbeKind::Liveness), Some(ProbeResult::Success));
    }
}
