//! Desired-state pod types (§3 DATA MODEL).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable per-pod identifier. Two pods with the same name at different times
/// have distinct UIDs.
pub type PodUid = Uuid;

/// `config-hash` annotation key: content hash of a static pod's spec.
pub const ANNOTATION_CONFIG_HASH: &str = "config-hash";
/// `config-mirror` annotation key: hash of the static pod a mirror stands in for.
pub const ANNOTATION_CONFIG_MIRROR: &str = "config-mirror";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub uid: PodUid,
    pub namespace: String,
    pub name: String,
    pub mirror: bool,
    pub annotations: HashMap<String, String>,
    pub spec: PodSpec,
}

impl Pod {
    /// `"<name>_<namespace>"`, the translation key between a static pod and
    /// its mirror pod.
    pub fn full_name(&self) -> String {
        full_name(&self.name, &self.namespace)
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_CONFIG_HASH)
            .map(String::as_str)
    }

    pub fn config_mirror(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_CONFIG_MIRROR)
            .map(String::as_str)
    }

    pub fn qos_class(&self) -> QosClass {
        qos_class_for(&self.spec.containers)
    }
}

pub fn full_name(name: &str, namespace: &str) -> String {
    format!("{name}_{namespace}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub init_containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub ephemeral_containers: Vec<ContainerSpec>,
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub termination_grace_period_seconds: u64,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
    #[serde(default)]
    pub host_network: bool,
}

impl Default for PodSpec {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            init_containers: Vec::new(),
            ephemeral_containers: Vec::new(),
            restart_policy: RestartPolicy::Always,
            termination_grace_period_seconds: 30,
            node_selector: HashMap::new(),
            host_network: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    pub startup_probe: Option<ProbeSpec>,
    pub readiness_probe: Option<ProbeSpec>,
    pub liveness_probe: Option<ProbeSpec>,
}

impl ContainerSpec {
    /// Content hash of the parts of a container spec that, if changed while
    /// the container is running, require a kill-and-restart (§4.K rule 6).
    pub fn spec_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.image.hash(&mut hasher);
        for e in &self.env {
            e.name.hash(&mut hasher);
            e.value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requests: Option<ResourceList>,
    pub limits: Option<ResourceList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceList {
    pub cpu_millis: Option<u64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

/// Standard derivation (SUPPLEMENT, see SPEC_FULL.md §3): Guaranteed iff every
/// container sets cpu+memory requests == limits; BestEffort iff no container
/// sets any request/limit; otherwise Burstable.
pub fn qos_class_for(containers: &[ContainerSpec]) -> QosClass {
    if containers.is_empty() {
        return QosClass::BestEffort;
    }
    let mut any_request = false;
    let mut all_guaranteed = true;
    for c in containers {
        let requests = c.resources.requests.as_ref();
        let limits = c.resources.limits.as_ref();
        let has_any = requests.is_some() || limits.is_some();
        any_request = any_request || has_any;

        let guaranteed = match (requests, limits) {
            (Some(r), Some(l)) => {
                r.cpu_millis.is_some()
                    && r.memory_bytes.is_some()
                    && r.cpu_millis == l.cpu_millis
                    && r.memory_bytes == l.memory_bytes
            }
            _ => false,
        };
        all_guaranteed = all_guaranteed && guaranteed;
    }
    if all_guaranteed {
        QosClass::Guaranteed
    } else if !any_request {
        QosClass::BestEffort
    } else {
        QosClass::Burstable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub kind: ProbeAction,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_period")]
    pub period_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_initial_delay() -> u64 {
    0
}
fn default_period() -> u64 {
    10
}
fn default_timeout() -> u64 {
    1
}
fn default_success_threshold() -> u32 {
    1
}
fn default_failure_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProbeAction {
    Exec { command: Vec<String> },
    Http { path: String, port: u16 },
    Tcp { port: u16 },
    Grpc { port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    Startup,
    Readiness,
    Liveness,
}
