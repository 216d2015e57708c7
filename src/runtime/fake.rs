//! In-memory [`RuntimeClient`] test double.
//!
//! Grounded in the teacher's `docker::test::TestDocker`: call recording via
//! `Mutex<Vec<_>>`, injectable failure flags, and a `DashMap` standing in for
//! the real daemon's container table.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::runtime::RuntimeClient;
use crate::types::pod::ContainerSpec;
use crate::types::runtime::{
    ContainerEvent, ContainerState, ContainerStatus, RuntimeError, RuntimePodStatus, SandboxState,
    SandboxStatus,
};
use crate::types::PodUid;

#[derive(Debug, Clone)]
struct FakeContainer {
    spec_name: String,
    image: String,
    state: ContainerState,
    exit_code: Option<i32>,
    restart_count: u32,
    spec_hash: u64,
}

#[derive(Debug, Clone)]
struct FakeSandbox {
    pod_uid: PodUid,
    state: SandboxState,
}

/// A fully in-memory stand-in for [`super::docker::DockerRuntime`].
#[derive(Default)]
pub struct FakeRuntime {
    sandboxes: DashMap<String, FakeSandbox>,
    containers: DashMap<String, FakeContainer>,

    pub fail_run_sandbox: Mutex<bool>,
    pub fail_create_container: Mutex<bool>,
    pub fail_start_container: Mutex<bool>,

    pending_rx: Mutex<Option<mpsc::Receiver<Result<ContainerEvent, RuntimeError>>>>,

    pub calls: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Installs a channel for [`RuntimeClient::container_events`] to drain;
    /// tests push synthetic events through the returned sender.
    pub fn event_sender(&self) -> mpsc::Sender<Result<ContainerEvent, RuntimeError>> {
        let (tx, rx) = mpsc::channel(64);
        *self.pending_rx.lock().unwrap() = Some(rx);
        tx
    }

    pub fn set_container_state(&self, container_id: &str, state: ContainerState, exit_code: Option<i32>) {
        if let Some(mut c) = self.containers.get_mut(container_id) {
            c.state = state;
            c.exit_code = exit_code;
        }
    }

    pub fn container_ids_for_pod(&self, pod_uid: PodUid) -> Vec<String> {
        self.containers
            .iter()
            .filter(|e| e.key().starts_with(&format!("{pod_uid}-")))
            .map(|e| e.key().clone())
            .collect()
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn version(&self, _cancel: &CancellationToken) -> Result<String, RuntimeError> {
        Ok("fake/1.0".to_string())
    }

    async fn list_pod_sandboxes(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<(PodUid, RuntimePodStatus)>, RuntimeError> {
        self.record("list_pod_sandboxes");
        Ok(self
            .sandboxes
            .iter()
            .map(|e| (e.pod_uid, RuntimePodStatus::empty(e.pod_uid)))
            .collect())
    }

    async fn pod_sandbox_status(
        &self,
        pod_uid: PodUid,
        _cancel: &CancellationToken,
    ) -> Result<RuntimePodStatus, RuntimeError> {
        let sandbox_id = format!("sandbox-{pod_uid}");
        let Some(sandbox) = self.sandboxes.get(&sandbox_id) else {
            return Err(RuntimeError::NotFound("sandbox not found".into()));
        };
        let containers = self
            .containers
            .iter()
            .filter(|e| e.key().starts_with(&format!("{pod_uid}-")))
            .map(|e| ContainerStatus {
                id: e.key().clone(),
                spec_name: e.spec_name.clone(),
                image: e.image.clone(),
                state: e.state,
                exit_code: e.exit_code,
                started_at: Some(Utc::now()),
                finished_at: None,
                restart_count: e.restart_count,
                spec_hash: e.spec_hash,
            })
            .collect();
        Ok(RuntimePodStatus {
            pod_uid,
            sandboxes: vec![SandboxStatus {
                id: sandbox_id,
                created_at: Utc::now(),
                state: sandbox.state,
            }],
            containers,
            ip: Some("10.0.0.1".to_string()),
        })
    }

    async fn run_pod_sandbox(
        &self,
        pod_uid: PodUid,
        _cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        self.record("run_pod_sandbox");
        if *self.fail_run_sandbox.lock().unwrap() {
            return Err(RuntimeError::Transient("forced sandbox failure".into()));
        }
        let id = format!("sandbox-{pod_uid}");
        self.sandboxes.insert(
            id.clone(),
            FakeSandbox {
                pod_uid,
                state: SandboxState::Ready,
            },
        );
        Ok(id)
    }

    async fn stop_pod_sandbox(&self, sandbox_id: &str, _cancel: &CancellationToken) -> Result<(), RuntimeError> {
        if let Some(mut s) = self.sandboxes.get_mut(sandbox_id) {
            s.state = SandboxState::NotReady;
        }
        Ok(())
    }

    async fn remove_pod_sandbox(&self, sandbox_id: &str, _cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.sandboxes.remove(sandbox_id);
        Ok(())
    }

    async fn pull_image(&self, _image: &str, _cancel: &CancellationToken) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create_container(
        &self,
        sandbox_id: &str,
        spec: &ContainerSpec,
        _cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        self.record("create_container");
        if *self.fail_create_container.lock().unwrap() {
            return Err(RuntimeError::Transient("forced create failure".into()));
        }
        let pod_uid = sandbox_id.trim_start_matches("sandbox-");
        let id = format!("{pod_uid}-{}-{}", spec.name, uuid::Uuid::new_v4());
        self.containers.insert(
            id.clone(),
            FakeContainer {
                spec_name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                exit_code: None,
                restart_count: 0,
                spec_hash: spec.spec_hash(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str, _cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.record("start_container");
        if *self.fail_start_container.lock().unwrap() {
            return Err(RuntimeError::Transient("forced start failure".into()));
        }
        if let Some(mut c) = self.containers.get_mut(container_id) {
            c.state = ContainerState::Running;
        } else {
            return Err(RuntimeError::NotFound("container not found".into()));
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _grace: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        if let Some(mut c) = self.containers.get_mut(container_id) {
            c.state = ContainerState::Exited;
            c.exit_code.get_or_insert(0);
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, _cancel: &CancellationToken) -> Result<(), RuntimeError> {
        self.containers.remove(container_id);
        Ok(())
    }

    async fn container_status(
        &self,
        container_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<ContainerStatus, RuntimeError> {
        let c = self
            .containers
            .get(container_id)
            .ok_or_else(|| RuntimeError::NotFound("container not found".into()))?;
        Ok(ContainerStatus {
            id: container_id.to_string(),
            spec_name: c.spec_name.clone(),
            image: c.image.clone(),
            state: c.state,
            exit_code: c.exit_code,
            started_at: Some(Utc::now()),
            finished_at: None,
            restart_count: c.restart_count,
            spec_hash: c.spec_hash,
        })
    }

    async fn container_events(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ContainerEvent, RuntimeError>>, RuntimeError> {
        let rx = self
            .pending_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RuntimeError::Fatal("event_sender() must be called before subscribing".into()))?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn exec_probe(
        &self,
        _container_id: &str,
        _command: &[String],
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<bool, RuntimeError> {
        Ok(true)
    }
}

impl std::fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRuntime").finish()
    }
}
