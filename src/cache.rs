//! Pod cache (§4.B): per-pod runtime-state snapshots with a global
//! timestamp and a wait-for-newer primitive.
//!
//! Translates the spec's "mutex + condition variable" into an async-idiomatic
//! `Mutex` + `tokio::sync::Notify` pair — `Notify::notify_waiters` stands in
//! for the condvar broadcast, the same way the teacher leans on `dashmap` and
//! `tokio::sync` rather than hand-rolled synchronization.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::types::{PodUid, RuntimePodStatus};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: Option<RuntimePodStatus>,
    pub fetch_error: Option<String>,
    pub modified_at: DateTime<Utc>,
}

struct Inner {
    entries: HashMap<PodUid, CacheEntry>,
    global_timestamp: DateTime<Utc>,
}

/// `{UID -> (status, fetchError, modifiedAt)}` plus a global timestamp.
pub struct PodCache {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for PodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PodCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                global_timestamp: DateTime::<Utc>::MIN_UTC,
            }),
            notify: Notify::new(),
        }
    }

    /// Replaces the entry iff `modified_at >= existing.modified_at`; broadcasts.
    pub fn set(
        &self,
        uid: PodUid,
        status: Option<RuntimePodStatus>,
        fetch_error: Option<String>,
        modified_at: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock().expect("pod cache mutex poisoned");
        let should_write = match inner.entries.get(&uid) {
            Some(existing) => modified_at >= existing.modified_at,
            None => true,
        };
        if should_write {
            inner.entries.insert(
                uid,
                CacheEntry {
                    status,
                    fetch_error,
                    modified_at,
                },
            );
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Sets `T_global = max(T_global, t)`; broadcasts. Called periodically
    /// (default every 5s, see [`crate::config::Config::cache_tick_period`])
    /// so waiters are never stuck forever when the runtime goes silent.
    pub fn update_time(&self, t: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("pod cache mutex poisoned");
        if t > inner.global_timestamp {
            inner.global_timestamp = t;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Removes an entry; broadcasts.
    pub fn delete(&self, uid: PodUid) {
        let mut inner = self.inner.lock().expect("pod cache mutex poisoned");
        inner.entries.remove(&uid);
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn get(&self, uid: PodUid) -> Option<CacheEntry> {
        self.inner
            .lock()
            .expect("pod cache mutex poisoned")
            .entries
            .get(&uid)
            .cloned()
    }

    pub fn global_timestamp(&self) -> DateTime<Utc> {
        self.inner.lock().expect("pod cache mutex poisoned").global_timestamp
    }

    /// Blocks until `entry(UID).modifiedAt > tau` OR `T_global > tau` OR the
    /// token is cancelled; returns the current entry (which may carry an
    /// error, or may be absent if the pod was deleted while waiting).
    ///
    /// Invariant 3 (spec.md §8): this method never returns for any other
    /// reason.
    pub async fn get_newer_than(
        &self,
        uid: PodUid,
        tau: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<CacheEntry> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().expect("pod cache mutex poisoned");
                let satisfied = inner.global_timestamp > tau
                    || inner
                        .entries
                        .get(&uid)
                        .map(|e| e.modified_at > tau)
                        .unwrap_or(false);
                if satisfied {
                    return inner.entries.get(&uid).cloned();
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn status(uid: PodUid) -> RuntimePodStatus {
        RuntimePodStatus::empty(uid)
    }

    #[tokio::test]
    async fn get_newer_than_unblocks_on_set() {
        let cache = std::sync::Arc::new(PodCache::new());
        let uid = Uuid::new_v4();
        let tau = Utc::now();

        let cache2 = cache.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { cache2.get_newer_than(uid, tau, &cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set(uid, Some(status(uid)), None, tau + chrono::Duration::seconds(1));

        let entry = handle.await.unwrap();
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn get_newer_than_unblocks_on_global_tick() {
        let cache = std::sync::Arc::new(PodCache::new());
        let uid = Uuid::new_v4();
        let tau = Utc::now();

        let cache2 = cache.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { cache2.get_newer_than(uid, tau, &cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.update_time(tau + chrono::Duration::seconds(1));

        // No entry was ever written for this uid: entry is None, but the
        // wait still unblocked because T_global advanced past tau.
        let entry = handle.await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn get_newer_than_unblocks_on_cancel() {
        let cache = std::sync::Arc::new(PodCache::new());
        let uid = Uuid::new_v4();
        let tau = Utc::now();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let cache2 = cache.clone();
        let handle = tokio::spawn(async move { cache2.get_newer_than(uid, tau, &cancel2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let entry = handle.await.unwrap();
        assert!(entry.is_none());
    }

    #[test]
    fn set_rejects_stale_write() {
        let cache = PodCache::new();
        let uid = Uuid::new_v4();
        let t1 = Utc::now();
        let t0 = t1 - chrono::Duration::seconds(5);

        cache.set(uid, Some(status(uid)), None, t1);
        cache.set(uid, None, Some("stale error".into()), t0);

        let entry = cache.get(uid).unwrap();
        assert_eq!(entry.modified_at, t1);
        assert!(entry.status.is_some());
    }
}
