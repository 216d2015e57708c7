//! Observed runtime-side types (§3 DATA MODEL: "Runtime pod status").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pod::PodUid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimePodStatus {
    pub pod_uid: PodUid,
    pub sandboxes: Vec<SandboxStatus>,
    pub containers: Vec<ContainerStatus>,
    pub ip: Option<String>,
}

impl RuntimePodStatus {
    pub fn empty(pod_uid: PodUid) -> Self {
        Self {
            pod_uid,
            sandboxes: Vec::new(),
            containers: Vec::new(),
            ip: None,
        }
    }

    pub fn ready_sandbox(&self) -> Option<&SandboxStatus> {
        self.sandboxes.iter().find(|s| s.state == SandboxState::Ready)
    }

    pub fn container(&self, spec_name: &str) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.spec_name == spec_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: SandboxState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    /// Name of the [`crate::types::pod::ContainerSpec`] this runs.
    pub spec_name: String,
    pub image: String,
    pub state: ContainerState,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    /// Hash of the spec this container was created from; compared against
    /// [`crate::types::pod::ContainerSpec::spec_hash`] to detect drift.
    pub spec_hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

/// A single entry of the runtime's streamed container event feed (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub pod_sandbox_id: String,
    pub container_id: String,
    pub event_type: ContainerEventType,
    pub updated_status: Option<RuntimePodStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEventType {
    Created,
    Started,
    Stopped,
    Deleted,
}

/// Error classification shared by every runtime RPC (§4.A / §7).
#[derive(Debug)]
pub enum RuntimeError {
    NotFound(String),
    Transient(String),
    Fatal(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::NotFound(msg) => write!(f, "not found: {msg}"),
            RuntimeError::Transient(msg) => write!(f, "transient: {msg}"),
            RuntimeError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Helper so call sites can build a deterministic id without pulling in a
/// full CRI filter type.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
