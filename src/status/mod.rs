//! Status manager (§4.G): coalesces desired status writes and pushes them
//! to the sink with version checking.

pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::types::pod::PodUid;
use sink::{PodStatusUpdate, StatusSink};

/// Coalescing write-behind cache: only the latest update per pod survives
/// between flushes, mirroring the teacher's one-pass-per-tick `sync::run`
/// but decoupled from the per-container polling that produces the updates.
pub struct StatusManager {
    sink: Arc<dyn StatusSink>,
    pending: DashMap<PodUid, PodStatusUpdate>,
    flush_period: Duration,
}

impl StatusManager {
    pub fn new(sink: Arc<dyn StatusSink>, flush_period: Duration) -> Self {
        Self {
            sink,
            pending: DashMap::new(),
            flush_period,
        }
    }

    /// Records the latest desired status for `uid`; overwrites any update
    /// not yet flushed.
    pub fn set(&self, uid: PodUid, update: PodStatusUpdate) {
        self.pending.insert(uid, update);
    }

    pub fn forget(&self, uid: PodUid) {
        self.pending.remove(&uid);
    }

    async fn flush_once(&self) {
        let keys: Vec<PodUid> = self.pending.iter().map(|e| *e.key()).collect();
        for uid in keys {
            let Some(update) = self.pending.get(&uid).map(|e| e.value().clone()) else {
                continue;
            };
            match self.sink.push(&update).await {
                Ok(()) => {
                    self.pending.remove(&uid);
                }
                Err(err) => {
                    tracing::warn!(pod_uid = %uid, error = %err, "status push failed, will retry next flush");
                }
            }
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), String> {
        tracing::info!("starting status manager");
        let mut interval = tokio::time::interval(self.flush_period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.flush_once().await,
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sink::{FakeSink, PodPhase};

    fn update(full_name: &str) -> PodStatusUpdate {
        PodStatusUpdate {
            full_name: full_name.to_string(),
            phase: PodPhase::Running,
            container_statuses: vec![],
            resource_version: None,
        }
    }

    #[tokio::test]
    async fn flush_clears_pending_on_success() {
        let sink = Arc::new(FakeSink::new());
        let manager = StatusManager::new(sink.clone(), Duration::from_secs(60));
        let uid = uuid::Uuid::new_v4();
        manager.set(uid, update("p1_default"));
        manager.flush_once().await;
        assert!(manager.pending.is_empty());
        assert_eq!(sink.pushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_flush_keeps_pending_for_retry() {
        let sink = Arc::new(FakeSink::new());
        *sink.fail_next.lock().unwrap() = true;
        let manager = StatusManager::new(sink.clone(), Duration::from_secs(60));
        let uid = uuid::Uuid::new_v4();
        manager.set(uid, update("p1_default"));
        manager.flush_once().await;
        assert_eq!(manager.pending.len(), 1);
    }
}
