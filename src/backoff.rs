//! Per-container start backoff (§4.J, §9 "Backoff keying").
//!
//! Keyed by `(podUID, containerName, imageRef)` so a spec change that swaps
//! the image resets the backoff, as called out explicitly in spec.md §9.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

const INITIAL: Duration = Duration::from_secs(10);
const MAX: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct Entry {
    current: Duration,
    next_attempt_at: Instant,
}

/// Exponential backoff store, one entry per `(pod uid, container name, image)`.
#[derive(Debug, Default)]
pub struct BackoffStore {
    entries: DashMap<(Uuid, String, String), Entry>,
}

impl BackoffStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// True if the caller should hold off starting this container right now.
    pub fn is_in_backoff(&self, pod_uid: Uuid, container: &str, image: &str) -> bool {
        let key = (pod_uid, container.to_string(), image.to_string());
        self.entries
            .get(&key)
            .map(|e| Instant::now() < e.next_attempt_at)
            .unwrap_or(false)
    }

    /// Records a failed start attempt, doubling the backoff (capped at
    /// [`MAX`]) and scheduling the next permitted attempt.
    pub fn record_failure(&self, pod_uid: Uuid, container: &str, image: &str) {
        let key = (pod_uid, container.to_string(), image.to_string());
        let mut entry = self.entries.entry(key).or_insert(Entry {
            current: INITIAL / 2,
            next_attempt_at: Instant::now(),
        });
        let next = (entry.current * 2).min(MAX);
        entry.current = next.max(INITIAL);
        entry.next_attempt_at = Instant::now() + entry.current;
    }

    /// Clears backoff state, e.g. once a container starts successfully.
    pub fn reset(&self, pod_uid: Uuid, container: &str, image: &str) {
        let key = (pod_uid, container.to_string(), image.to_string());
        self.entries.remove(&key);
    }

    /// Drops all entries for a UID, called when its worker is garbage
    /// collected (§3 "Lifecycle").
    pub fn forget_pod(&self, pod_uid: Uuid) {
        self.entries.retain(|(uid, _, _), _| *uid != pod_uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_and_resets() {
        let store = BackoffStore::new();
        assert!(!store.is_in_backoff(Uuid::nil(), "c1", "img:v1"));

        store.record_failure(Uuid::nil(), "c1", "img:v1");
        assert!(store.is_in_backoff(Uuid::nil(), "c1", "img:v1"));

        store.reset(Uuid::nil(), "c1", "img:v1");
        assert!(!store.is_in_backoff(Uuid::nil(), "c1", "img:v1"));
    }

    #[test]
    fn image_change_resets_key() {
        let store = BackoffStore::new();
        store.record_failure(Uuid::nil(), "c1", "img:v1");
        assert!(store.is_in_backoff(Uuid::nil(), "c1", "img:v1"));
        // different image => different key => not in backoff
        assert!(!store.is_in_backoff(Uuid::nil(), "c1", "img:v2"));
    }
}
