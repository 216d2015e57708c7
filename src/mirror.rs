//! Mirror pod subsystem (§3 "Static pod & mirror pod", scenario S5).
//!
//! A static pod (one carrying `config-hash`, i.e. admitted through a
//! non-sink source) gets a companion mirror pod pushed to the sink purely
//! for observability. Grounded in the teacher's `sync.rs` push pattern
//! (`Client::new()` + a JSON body keyed by full name), reused here for a
//! pod body instead of a status body.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::AgentError;
use crate::pod_manager::PodManager;
use crate::types::pod::{Pod, ANNOTATION_CONFIG_MIRROR};

/// Fixed so the same (full name, content hash) pair always derives the same
/// mirror UID, the same determinism rationale as `sources::file`/`sources::url`.
const MIRROR_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x69, 0x72, 0x72, 0x6f, 0x72, 0x2d, 0x70, 0x6f, 0x64, 0x2d, 0x6e, 0x73, 0x00, 0x00, 0x01,
]);

#[derive(Debug, Clone)]
pub enum MirrorCommand {
    Upsert(Pod),
    Delete(String),
}

#[async_trait]
pub trait MirrorSink: Send + Sync {
    async fn upsert(&self, pod: &Pod) -> Result<(), AgentError>;
    async fn delete(&self, full_name: &str) -> Result<(), AgentError>;
}

pub struct HttpMirrorSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMirrorSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MirrorSink for HttpMirrorSink {
    async fn upsert(&self, pod: &Pod) -> Result<(), AgentError> {
        let url = format!("{}/pods/{}", self.base_url, pod.full_name());
        let resp = self
            .client
            .put(&url)
            .json(pod)
            .send()
            .await
            .map_err(|err| AgentError::transient(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(AgentError::transient(format!("mirror push failed: HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn delete(&self, full_name: &str) -> Result<(), AgentError> {
        let url = format!("{}/pods/{}", self.base_url, full_name);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|err| AgentError::transient(err.to_string()))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(AgentError::transient(format!("mirror delete failed: HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// In-memory test double.
#[derive(Default)]
pub struct FakeMirrorSink {
    pub upserts: Mutex<Vec<Pod>>,
    pub deletes: Mutex<Vec<String>>,
}

impl FakeMirrorSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorSink for FakeMirrorSink {
    async fn upsert(&self, pod: &Pod) -> Result<(), AgentError> {
        self.upserts.lock().await.push(pod.clone());
        Ok(())
    }

    async fn delete(&self, full_name: &str) -> Result<(), AgentError> {
        self.deletes.lock().await.push(full_name.to_string());
        Ok(())
    }
}

/// Single-owner task: keeps the mirror pod for every static pod in sync
/// with the sink and with `pod_manager`'s mirror indices.
pub struct MirrorManager {
    sink: Arc<dyn MirrorSink>,
    pod_manager: Arc<PodManager>,
}

impl MirrorManager {
    pub fn new(sink: Arc<dyn MirrorSink>, pod_manager: Arc<PodManager>) -> Self {
        Self { sink, pod_manager }
    }

    pub async fn run(&self, rx: &mut mpsc::Receiver<MirrorCommand>, cancel: CancellationToken) {
        tracing::info!("starting mirror manager");
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => self.handle(cmd).await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn handle(&self, cmd: MirrorCommand) {
        match cmd {
            MirrorCommand::Upsert(static_pod) => self.upsert(static_pod).await,
            MirrorCommand::Delete(full_name) => self.delete(full_name).await,
        }
    }

    async fn upsert(&self, static_pod: Pod) {
        let Some(hash) = static_pod.config_hash().map(str::to_string) else {
            return;
        };
        let full = static_pod.full_name();
        if let Some(existing) = self.pod_manager.mirror_by_full_name(&full) {
            if existing.config_mirror() == Some(hash.as_str()) {
                return;
            }
        }

        let mirror_uid = Uuid::new_v5(&MIRROR_NAMESPACE, format!("{full}|{hash}").as_bytes());
        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_CONFIG_MIRROR.to_string(), hash);
        let mirror = Pod {
            uid: mirror_uid,
            namespace: static_pod.namespace,
            name: static_pod.name,
            mirror: true,
            annotations,
            spec: static_pod.spec,
        };

        match self.sink.upsert(&mirror).await {
            Ok(()) => self.pod_manager.add(mirror),
            Err(err) => tracing::warn!(full_name = %full, error = %err, "mirror pod push failed"),
        }
    }

    async fn delete(&self, full_name: String) {
        let Some(existing) = self.pod_manager.mirror_by_full_name(&full_name) else {
            return;
        };
        match self.sink.delete(&full_name).await {
            Ok(()) => self.pod_manager.delete(existing.uid),
            Err(err) => tracing::warn!(full_name = %full_name, error = %err, "mirror pod delete failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pod::PodSpec;
    use std::collections::HashMap as StdHashMap;

    fn static_pod(uid: Uuid, name: &str, hash: &str) -> Pod {
        let mut annotations = StdHashMap::new();
        annotations.insert("config-hash".to_string(), hash.to_string());
        Pod {
            uid,
            namespace: "default".to_string(),
            name: name.to_string(),
            mirror: false,
            annotations,
            spec: PodSpec::default(),
        }
    }

    #[tokio::test]
    async fn upsert_creates_mirror_with_matching_hash() {
        let sink = Arc::new(FakeMirrorSink::new());
        let pod_manager = Arc::new(PodManager::new());
        let manager = MirrorManager::new(sink.clone(), pod_manager.clone());

        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h1")).await;

        let mirror = pod_manager.mirror_by_full_name("sp1_default").expect("mirror created");
        assert_eq!(mirror.config_mirror(), Some("h1"));
        assert_eq!(sink.upserts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_noop_when_hash_unchanged() {
        let sink = Arc::new(FakeMirrorSink::new());
        let pod_manager = Arc::new(PodManager::new());
        let manager = MirrorManager::new(sink.clone(), pod_manager.clone());

        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h1")).await;
        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h1")).await;

        assert_eq!(sink.upserts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn hash_change_creates_new_mirror() {
        let sink = Arc::new(FakeMirrorSink::new());
        let pod_manager = Arc::new(PodManager::new());
        let manager = MirrorManager::new(sink.clone(), pod_manager.clone());

        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h1")).await;
        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h2")).await;

        let mirror = pod_manager.mirror_by_full_name("sp1_default").unwrap();
        assert_eq!(mirror.config_mirror(), Some("h2"));
        assert_eq!(sink.upserts.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_mirror_and_calls_sink() {
        let sink = Arc::new(FakeMirrorSink::new());
        let pod_manager = Arc::new(PodManager::new());
        let manager = MirrorManager::new(sink.clone(), pod_manager.clone());

        manager.upsert(static_pod(Uuid::new_v4(), "sp1", "h1")).await;
        manager.delete("sp1_default".to_string()).await;

        assert!(pod_manager.mirror_by_full_name("sp1_default").is_none());
        assert_eq!(sink.deletes.lock().await.len(), 1);
    }
}
