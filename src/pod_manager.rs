//! Pod manager (§4.D): authoritative set of desired pods keyed by UID, with
//! static-pod/mirror-pod translation.
//!
//! Five indices maintained atomically under a single lock, mirroring the
//! teacher's `NodeState` convention of private fields and method-only access
//! (`node/src/state.rs`).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::pod::full_name;
use crate::types::{Pod, PodUid};

#[derive(Default)]
struct Indices {
    pod_by_uid: HashMap<PodUid, Pod>,
    pod_by_full_name: HashMap<String, PodUid>,
    mirror_by_uid: HashMap<PodUid, Pod>,
    mirror_by_full_name: HashMap<String, PodUid>,
    /// mirror UID -> static UID
    translation: HashMap<PodUid, PodUid>,
}

/// Authoritative desired-pod store. All mutation goes through methods on
/// this type; fields are private (spec.md §9 "no subsystem holds a handle to
/// another's state").
pub struct PodManager {
    indices: RwLock<Indices>,
}

impl Default for PodManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PodManager {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
        }
    }

    /// Replace-all: resets every index to exactly the given static and
    /// mirror pods, preserving the mirror/static invariant.
    pub fn set(&self, static_pods: Vec<Pod>, mirror_pods: Vec<Pod>) {
        let mut idx = self.indices.write().unwrap();
        *idx = Indices::default();
        drop(idx);
        for p in static_pods {
            self.add(p);
        }
        for m in mirror_pods {
            self.add(m);
        }
    }

    /// Adds (or replaces) a pod, updating all indices consistently.
    pub fn add(&self, pod: Pod) {
        let mut idx = self.indices.write().unwrap();
        let full = pod.full_name();
        if pod.mirror {
            idx.mirror_by_full_name.insert(full.clone(), pod.uid);
            if let Some(&static_uid) = idx.pod_by_full_name.get(&full) {
                idx.translation.insert(pod.uid, static_uid);
            }
            idx.mirror_by_uid.insert(pod.uid, pod);
        } else {
            idx.pod_by_full_name.insert(full.clone(), pod.uid);
            if let Some(&mirror_uid) = idx.mirror_by_full_name.get(&full) {
                idx.translation.insert(mirror_uid, pod.uid);
            }
            idx.pod_by_uid.insert(pod.uid, pod);
        }
    }

    pub fn update(&self, pod: Pod) {
        self.add(pod);
    }

    /// Deletes a pod (static or mirror) by UID, scrubbing every index.
    pub fn delete(&self, uid: PodUid) {
        let mut idx = self.indices.write().unwrap();
        if let Some(pod) = idx.pod_by_uid.remove(&uid) {
            let full = pod.full_name();
            if idx.pod_by_full_name.get(&full) == Some(&uid) {
                idx.pod_by_full_name.remove(&full);
            }
            idx.translation.retain(|_, static_uid| *static_uid != uid);
        }
        if let Some(pod) = idx.mirror_by_uid.remove(&uid) {
            let full = pod.full_name();
            if idx.mirror_by_full_name.get(&full) == Some(&uid) {
                idx.mirror_by_full_name.remove(&full);
            }
            idx.translation.remove(&uid);
        }
    }

    pub fn get_pods(&self) -> Vec<Pod> {
        self.indices.read().unwrap().pod_by_uid.values().cloned().collect()
    }

    pub fn get_mirror_pods(&self) -> Vec<Pod> {
        self.indices.read().unwrap().mirror_by_uid.values().cloned().collect()
    }

    pub fn get_by_full_name(&self, full_name: &str) -> Option<Pod> {
        let idx = self.indices.read().unwrap();
        idx.pod_by_full_name
            .get(full_name)
            .and_then(|uid| idx.pod_by_uid.get(uid).cloned())
    }

    pub fn get_by_uid(&self, uid: PodUid) -> Option<Pod> {
        let idx = self.indices.read().unwrap();
        idx.pod_by_uid
            .get(&uid)
            .or_else(|| idx.mirror_by_uid.get(&uid))
            .cloned()
    }

    /// Mirror UID -> static UID, or `None` if `uid` is not a mirror UID with
    /// a live static counterpart.
    pub fn translate_uid(&self, mirror_uid: PodUid) -> Option<PodUid> {
        self.indices.read().unwrap().translation.get(&mirror_uid).copied()
    }

    /// Full names present in the mirror set but not in the static set
    /// (§4.D, used by invariant 2 / round-trip law 7).
    pub fn get_orphaned_mirror_names(&self) -> Vec<String> {
        let idx = self.indices.read().unwrap();
        idx.mirror_by_full_name
            .keys()
            .filter(|full| !idx.pod_by_full_name.contains_key(*full))
            .cloned()
            .collect()
    }

    pub fn mirror_by_full_name(&self, full_name: &str) -> Option<Pod> {
        let idx = self.indices.read().unwrap();
        idx.mirror_by_full_name
            .get(full_name)
            .and_then(|uid| idx.mirror_by_uid.get(uid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pod::{PodSpec, RestartPolicy};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn pod(uid: PodUid, name: &str, namespace: &str, mirror: bool) -> Pod {
        Pod {
            uid,
            namespace: namespace.to_string(),
            name: name.to_string(),
            mirror,
            annotations: HashMap::new(),
            spec: PodSpec {
                restart_policy: RestartPolicy::Always,
                ..Default::default()
            },
        }
    }

    #[test]
    fn translation_links_static_and_mirror_by_full_name() {
        let mgr = PodManager::new();
        let static_uid = Uuid::new_v4();
        let mirror_uid = Uuid::new_v4();

        mgr.add(pod(static_uid, "sp1", "default", false));
        mgr.add(pod(mirror_uid, "sp1", "default", true));

        assert_eq!(mgr.translate_uid(mirror_uid), Some(static_uid));
        assert!(mgr.get_orphaned_mirror_names().is_empty());
    }

    #[test]
    fn orphaned_mirror_detected_after_static_delete() {
        let mgr = PodManager::new();
        let static_uid = Uuid::new_v4();
        let mirror_uid = Uuid::new_v4();

        mgr.add(pod(static_uid, "sp1", "default", false));
        mgr.add(pod(mirror_uid, "sp1", "default", true));
        mgr.delete(static_uid);

        assert_eq!(mgr.translate_uid(mirror_uid), None);
        assert_eq!(mgr.get_orphaned_mirror_names(), vec!["sp1_default".to_string()]);
    }

    #[test]
    fn delete_removes_pod_and_mirror_independently() {
        let mgr = PodManager::new();
        let uid = Uuid::new_v4();
        mgr.add(pod(uid, "p1", "ns", false));
        assert!(mgr.get_by_uid(uid).is_some());
        mgr.delete(uid);
        assert!(mgr.get_by_uid(uid).is_none());
    }
}
