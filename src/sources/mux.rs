//! SET-diffing multiplexer (§4.E).
//!
//! Owns each source's "seen" set and turns a raw `Set` into the synthetic
//! `Add`/`Update`/`Remove` batch the rest of the agent consumes. Grounded in
//! the teacher's single-writer `State` convention (`node/src/state.rs`): one
//! lock, private fields, mutation only through methods.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::sources::{Op, SourceUpdate};
use crate::types::pod::PodUid;
use crate::types::Pod;

struct Inner {
    /// Last known full set per source, used to diff the next `Set`.
    baseline: HashMap<String, HashMap<PodUid, Pod>>,
    /// (source, uid) identity ownership — a UID may only ever belong to one source.
    uid_owner: HashMap<PodUid, String>,
    ready_sources: HashSet<String>,
    registered_sources: HashSet<String>,
}

pub struct SourceMux {
    inner: Mutex<Inner>,
}

impl SourceMux {
    pub fn new(source_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                baseline: HashMap::new(),
                uid_owner: HashMap::new(),
                ready_sources: HashSet::new(),
                registered_sources: source_names.into_iter().collect(),
            }),
        }
    }

    /// True once every registered source has delivered at least one message.
    pub fn all_sources_ready(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.registered_sources.is_subset(&inner.ready_sources)
    }

    /// Normalizes one raw update from a source into the batch(es) that
    /// should be forwarded to the dispatcher. Never returns `Op::Set` —
    /// that op is fully resolved here.
    pub fn process(&self, update: SourceUpdate) -> Vec<SourceUpdate> {
        let mut inner = self.inner.lock().unwrap();
        inner.ready_sources.insert(update.source.clone());

        match update.op {
            Op::Set => self.diff_set(&mut inner, update.source, update.pods),
            Op::Add => self.normalize_add(&mut inner, update.source, update.pods),
            Op::Update | Op::Delete | Op::Remove | Op::Reconcile => {
                let pods = self.admit_identities(&mut inner, &update.source, update.pods);
                if pods.is_empty() {
                    return Vec::new();
                }
                if update.op == Op::Remove {
                    if let Some(baseline) = inner.baseline.get_mut(&update.source) {
                        for p in &pods {
                            baseline.remove(&p.uid);
                        }
                    }
                }
                vec![SourceUpdate {
                    source: update.source,
                    op: update.op,
                    pods,
                }]
            }
        }
    }

    fn diff_set(&self, inner: &mut Inner, source: String, pods: Vec<Pod>) -> Vec<SourceUpdate> {
        let pods = self.admit_identities(inner, &source, pods);
        let new_by_uid: HashMap<PodUid, Pod> = pods.into_iter().map(|p| (p.uid, p)).collect();
        let previous = inner.baseline.get(&source).cloned().unwrap_or_default();

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (uid, pod) in &new_by_uid {
            match previous.get(uid) {
                None => added.push(pod.clone()),
                Some(old) if old.config_hash() != pod.config_hash() => updated.push(pod.clone()),
                Some(_) => {}
            }
        }
        let removed: Vec<Pod> = previous
            .iter()
            .filter(|(uid, _)| !new_by_uid.contains_key(uid))
            .map(|(_, p)| p.clone())
            .collect();

        inner.baseline.insert(source.clone(), new_by_uid);

        let mut out = Vec::new();
        if !added.is_empty() {
            out.push(SourceUpdate {
                source: source.clone(),
                op: Op::Add,
                pods: added,
            });
        }
        if !updated.is_empty() {
            out.push(SourceUpdate {
                source: source.clone(),
                op: Op::Update,
                pods: updated,
            });
        }
        if !removed.is_empty() {
            out.push(SourceUpdate {
                source,
                op: Op::Remove,
                pods: removed,
            });
        }
        out
    }

    fn normalize_add(&self, inner: &mut Inner, source: String, pods: Vec<Pod>) -> Vec<SourceUpdate> {
        let pods = self.admit_identities(inner, &source, pods);
        if pods.is_empty() {
            return Vec::new();
        }
        let baseline = inner.baseline.entry(source.clone()).or_default();
        let (fresh, known): (Vec<Pod>, Vec<Pod>) =
            pods.into_iter().partition(|p| !baseline.contains_key(&p.uid));
        for p in fresh.iter().chain(known.iter()) {
            baseline.insert(p.uid, p.clone());
        }

        let mut out = Vec::new();
        if !fresh.is_empty() {
            out.push(SourceUpdate {
                source: source.clone(),
                op: Op::Add,
                pods: fresh,
            });
        }
        if !known.is_empty() {
            // Repeated ADD for a known UID is normalized to UPDATE.
            out.push(SourceUpdate {
                source,
                op: Op::Update,
                pods: known,
            });
        }
        out
    }

    /// Drops pods whose UID is already claimed by a different source,
    /// logging the violation; records ownership for the rest.
    fn admit_identities(&self, inner: &mut Inner, source: &str, pods: Vec<Pod>) -> Vec<Pod> {
        pods.into_iter()
            .filter(|p| match inner.uid_owner.get(&p.uid) {
                Some(owner) if owner != source => {
                    tracing::error!(
                        pod_uid = %p.uid,
                        owner = owner,
                        claimant = source,
                        "rejecting pod: UID already claimed by another source"
                    );
                    false
                }
                _ => {
                    inner.uid_owner.insert(p.uid, source.to_string());
                    true
                }
            })
            .collect()
    }
}
