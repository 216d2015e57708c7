//! Runtime manager / `Sync` (§4.K): computes the delta between desired pod
//! and observed runtime status, then drives the runtime facade to close it.
//!
//! `compute_actions` is grounded in the teacher's `worker::reconciliate` /
//! `core::worker::reconciliate` (single existing-runtime check, then start)
//! generalized into the full rule set; `execute_actions`'s per-container
//! create/start loop is grounded in `docker::manager::DockerManager::
//! start_pod`.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffStore;
use crate::errors::AgentError;
use crate::probes::store::{ProbeResult, ProbeResultStore};
use crate::runtime::RuntimeClient;
use crate::types::pod::{Pod, ProbeKind, RestartPolicy};
use crate::types::runtime::{ContainerState, RuntimePodStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTrigger {
    SpecChanged,
    LivenessProbe,
    StartupProbe,
    InitUnknownState,
}

#[derive(Debug, Clone)]
pub struct KillEntry {
    pub container_name: String,
    pub reason: KillTrigger,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PodActions {
    pub kill_pod: bool,
    pub create_sandbox: bool,
    pub sandbox_id: Option<String>,
    pub attempt: u32,
    pub next_init_container: Option<usize>,
    pub containers_to_start: Vec<usize>,
    pub ephemeral_containers_to_start: Vec<usize>,
    pub containers_to_kill: HashMap<String, KillEntry>,
}

impl PodActions {
    /// True when this plan is a pure no-op — used by the round-trip
    /// idempotence property (§8 law 6).
    pub fn is_noop(&self) -> bool {
        !self.kill_pod
            && !self.create_sandbox
            && self.next_init_container.is_none()
            && self.containers_to_start.is_empty()
            && self.ephemeral_containers_to_start.is_empty()
            && self.containers_to_kill.is_empty()
    }
}

/// Whether a container with the given last exit code should be (re)started
/// under `policy`. `None` means the container has never run.
fn should_restart(policy: RestartPolicy, exit_code: Option<i32>) -> bool {
    match exit_code {
        None => true,
        Some(0) => matches!(policy, RestartPolicy::Always),
        Some(_) => matches!(policy, RestartPolicy::Always | RestartPolicy::OnFailure),
    }
}

/// Computes the `PodActions` plan (§4.K rules 1-7). Pure function: no
/// runtime I/O, no clock reads beyond what's embedded in `observed`.
pub fn compute_actions(
    pod: &Pod,
    observed: Option<&RuntimePodStatus>,
    probes: &ProbeResultStore,
    current_attempt: u32,
) -> PodActions {
    let mut actions = PodActions {
        attempt: current_attempt,
        ..Default::default()
    };

    // Rule 1: sandbox-changed triggers. Only (a) "no READY sandbox" and (d)
    // "IP required but missing" are checked — (b) network-mode change and
    // (c) label/annotation identity drift have no runtime-observable
    // counterpart in this implementation's sandbox model (see DESIGN.md).
    let ready_sandbox = observed.and_then(|o| o.ready_sandbox());
    let ip_required = !pod.spec.host_network;
    let ip_missing = ip_required && observed.map(|o| o.ip.is_none()).unwrap_or(true);
    let sandbox_changed = ready_sandbox.is_none() || ip_missing;

    if sandbox_changed {
        actions.kill_pod = true;
        actions.create_sandbox = true;
        actions.attempt = current_attempt + 1;
    } else {
        actions.sandbox_id = ready_sandbox.map(|s| s.id.clone());
    }

    // Rule 2: RestartPolicy::Never + some container already terminated => done.
    if actions.create_sandbox && pod.spec.restart_policy == RestartPolicy::Never {
        let any_terminated = observed
            .map(|o| o.containers.iter().any(|c| c.state == ContainerState::Exited))
            .unwrap_or(false);
        if any_terminated {
            actions.create_sandbox = false;
            return actions;
        }
    }

    // Rule 3: sandbox creation gates on init containers first.
    if actions.create_sandbox && !pod.spec.init_containers.is_empty() {
        actions.next_init_container = Some(0);
        return actions;
    }

    // Rule 4: walk init containers in order.
    let mut all_init_succeeded = true;
    for (idx, ic) in pod.spec.init_containers.iter().enumerate() {
        let status = observed.and_then(|o| o.container(&ic.name));
        match status {
            None => {
                all_init_succeeded = false;
                actions.next_init_container = Some(idx);
                break;
            }
            Some(s) if s.state == ContainerState::Exited && s.exit_code == Some(0) => continue,
            Some(s) if s.state == ContainerState::Exited => {
                all_init_succeeded = false;
                if pod.spec.restart_policy == RestartPolicy::Never {
                    actions.kill_pod = true;
                } else {
                    actions.next_init_container = Some(idx);
                }
                break;
            }
            Some(s) if s.state == ContainerState::Unknown => {
                all_init_succeeded = false;
                actions.containers_to_kill.insert(
                    s.id.clone(),
                    KillEntry {
                        container_name: ic.name.clone(),
                        reason: KillTrigger::InitUnknownState,
                        message: "init container in unknown state".to_string(),
                    },
                );
                actions.next_init_container = Some(idx);
                break;
            }
            Some(_) => {
                all_init_succeeded = false;
                actions.next_init_container = Some(idx);
                break;
            }
        }
    }
    if !all_init_succeeded {
        return actions;
    }

    // Rule 5: ephemeral containers never restart.
    for (idx, ec) in pod.spec.ephemeral_containers.iter().enumerate() {
        if observed.and_then(|o| o.container(&ec.name)).is_none() {
            actions.ephemeral_containers_to_start.push(idx);
        }
    }

    // Rule 6: regular containers.
    let mut keep_count = 0u32;
    for (idx, c) in pod.spec.containers.iter().enumerate() {
        let status = observed.and_then(|o| o.container(&c.name));
        match status {
            None => {
                if should_restart(pod.spec.restart_policy, None) {
                    actions.containers_to_start.push(idx);
                }
            }
            Some(s) if s.state != ContainerState::Running => {
                if should_restart(pod.spec.restart_policy, s.exit_code) {
                    actions.containers_to_start.push(idx);
                }
            }
            Some(s) if s.spec_hash != c.spec_hash() => {
                actions.containers_to_kill.insert(
                    s.id.clone(),
                    KillEntry {
                        container_name: c.name.clone(),
                        reason: KillTrigger::SpecChanged,
                        message: "container spec changed".to_string(),
                    },
                );
                actions.containers_to_start.push(idx);
            }
            Some(s) if probes.get(pod.uid, &c.name, ProbeKind::Liveness) == Some(ProbeResult::Failure) => {
                actions.containers_to_kill.insert(
                    s.id.clone(),
                    KillEntry {
                        container_name: c.name.clone(),
                        reason: KillTrigger::LivenessProbe,
                        message: "liveness probe failed".to_string(),
                    },
                );
                if should_restart(pod.spec.restart_policy, None) {
                    actions.containers_to_start.push(idx);
                }
            }
            Some(s) if probes.get(pod.uid, &c.name, ProbeKind::Startup) == Some(ProbeResult::Failure) => {
                actions.containers_to_kill.insert(
                    s.id.clone(),
                    KillEntry {
                        container_name: c.name.clone(),
                        reason: KillTrigger::StartupProbe,
                        message: "startup probe failed".to_string(),
                    },
                );
                if should_restart(pod.spec.restart_policy, None) {
                    actions.containers_to_start.push(idx);
                }
            }
            Some(_) => keep_count += 1,
        }
    }

    // Rule 7.
    if keep_count == 0 && actions.containers_to_start.is_empty() {
        actions.kill_pod = true;
    }

    actions
}

/// Outcome of one `execute_actions` pass, recorded as a sync result.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub stages_completed: Vec<&'static str>,
    pub new_sandbox_id: Option<String>,
}

/// Drives the runtime facade through the seven execution stages (§4.K). The
/// first stage to fail short-circuits the rest; the worker retries on its
/// next iteration rather than this function retrying internally.
pub async fn execute_actions(
    runtime: &dyn RuntimeClient,
    pod: &Pod,
    actions: &PodActions,
    observed: Option<&RuntimePodStatus>,
    grace_override: Option<Duration>,
    backoff: &BackoffStore,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, AgentError> {
    let mut outcome = ExecutionOutcome::default();
    let pod_grace =
        grace_override.unwrap_or_else(|| Duration::from_secs(pod.spec.termination_grace_period_seconds));

    // (i) kill pod. When a recreate is pending (`create_sandbox`), fall
    // through into the later stages in the same pass instead of stopping
    // here — otherwise a cold start (kill_pod+create_sandbox both set,
    // since a pod with no ready sandbox is trivially "must be killed and
    // rebuilt") could never progress past tearing down a sandbox that
    // never existed.
    if actions.kill_pod {
        if let Some(status) = observed {
            for c in &status.containers {
                let _ = runtime.stop_container(&c.id, pod_grace, cancel).await;
                let _ = runtime.remove_container(&c.id, cancel).await;
            }
            for sandbox in &status.sandboxes {
                runtime.stop_pod_sandbox(&sandbox.id, cancel).await.map_err(AgentError::from)?;
                runtime
                    .remove_pod_sandbox(&sandbox.id, cancel)
                    .await
                    .map_err(AgentError::from)?;
            }
        }
        outcome.stages_completed.push("kill_pod");
        if !actions.create_sandbox {
            return Ok(outcome);
        }
    }

    // (ii) kill individual containers.
    for (container_id, entry) in &actions.containers_to_kill {
        tracing::info!(pod_uid = %pod.uid, container = %entry.container_name, reason = ?entry.reason, "killing container");
        runtime
            .stop_container(container_id, pod_grace, cancel)
            .await
            .map_err(AgentError::from)?;
        runtime.remove_container(container_id, cancel).await.map_err(AgentError::from)?;
    }
    outcome.stages_completed.push("kill_containers");

    // (iii) prune terminated init containers.
    if let Some(status) = observed {
        for ic in &pod.spec.init_containers {
            if let Some(s) = status.container(&ic.name) {
                if s.state == ContainerState::Exited && s.exit_code == Some(0) {
                    let _ = runtime.remove_container(&s.id, cancel).await;
                }
            }
        }
    }
    outcome.stages_completed.push("prune_init_containers");

    // (iv) create sandbox.
    let sandbox_id = if actions.create_sandbox {
        let id = runtime.run_pod_sandbox(pod.uid, cancel).await.map_err(AgentError::from)?;
        outcome.new_sandbox_id = Some(id.clone());
        outcome.stages_completed.push("create_sandbox");
        id
    } else {
        match &actions.sandbox_id {
            Some(id) => id.clone(),
            None => return Ok(outcome),
        }
    };

    // (v) start ephemeral containers.
    for &idx in &actions.ephemeral_containers_to_start {
        let spec = &pod.spec.ephemeral_containers[idx];
        start_container(runtime, &sandbox_id, pod, spec, backoff, cancel).await?;
    }
    outcome.stages_completed.push("start_ephemeral_containers");

    // (vi) start next init container.
    if let Some(idx) = actions.next_init_container {
        let spec = &pod.spec.init_containers[idx];
        start_container(runtime, &sandbox_id, pod, spec, backoff, cancel).await?;
        outcome.stages_completed.push("start_init_container");
        return Ok(outcome);
    }

    // (vii) start regular containers.
    for &idx in &actions.containers_to_start {
        let spec = &pod.spec.containers[idx];
        if backoff.is_in_backoff(pod.uid, &spec.name, &spec.image) {
            tracing::debug!(pod_uid = %pod.uid, container = %spec.name, "container start skipped: in backoff");
            continue;
        }
        start_container(runtime, &sandbox_id, pod, spec, backoff, cancel).await?;
    }
    outcome.stages_completed.push("start_containers");

    Ok(outcome)
}

async fn start_container(
    runtime: &dyn RuntimeClient,
    sandbox_id: &str,
    pod: &Pod,
    spec: &crate::types::pod::ContainerSpec,
    backoff: &BackoffStore,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    if let Err(err) = runtime.pull_image(&spec.image, cancel).await {
        backoff.record_failure(pod.uid, &spec.name, &spec.image);
        return Err(err.into());
    }
    let container_id = match runtime.create_container(sandbox_id, spec, cancel).await {
        Ok(id) => id,
        Err(err) => {
            backoff.record_failure(pod.uid, &spec.name, &spec.image);
            return Err(err.into());
        }
    };
    match runtime.start_container(&container_id, cancel).await {
        Ok(()) => {
            backoff.reset(pod.uid, &spec.name, &spec.image);
            Ok(())
        }
        Err(err) => {
            backoff.record_failure(pod.uid, &spec.name, &spec.image);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pod::{ContainerSpec, PodSpec, QosClass};
    use crate::types::runtime::{ContainerStatus, SandboxState, SandboxStatus};
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn container_spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img:v1".to_string(),
            env: vec![],
            resources: Default::default(),
            startup_probe: None,
            readiness_probe: None,
            liveness_probe: None,
        }
    }

    fn base_pod(restart: RestartPolicy) -> Pod {
        Pod {
            uid: Uuid::new_v4(),
            namespace: "default".to_string(),
            name: "p1".to_string(),
            mirror: false,
            annotations: StdHashMap::new(),
            spec: PodSpec {
                containers: vec![container_spec("c1")],
                restart_policy: restart,
                ..Default::default()
            },
        }
    }

    fn status_with_container(pod_uid: Uuid, state: ContainerState, exit_code: Option<i32>, spec_hash: u64) -> RuntimePodStatus {
        RuntimePodStatus {
            pod_uid,
            sandboxes: vec![SandboxStatus {
                id: "sandbox-1".to_string(),
                created_at: Utc::now(),
                state: SandboxState::Ready,
            }],
            containers: vec![ContainerStatus {
                id: "c1-id".to_string(),
                spec_name: "c1".to_string(),
                image: "img:v1".to_string(),
                state,
                exit_code,
                started_at: Some(Utc::now()),
                finished_at: None,
                restart_count: 0,
                spec_hash,
            }],
            ip: Some("10.0.0.1".to_string()),
        }
    }

    #[test]
    fn cold_start_creates_sandbox_and_starts_container() {
        let pod = base_pod(RestartPolicy::Always);
        let store = ProbeResultStore::new();
        let actions = compute_actions(&pod, None, &store, 0);
        assert!(actions.create_sandbox);
        assert!(actions.kill_pod);
        assert_eq!(actions.attempt, 1);
    }

    #[test]
    fn steady_state_is_noop() {
        let pod = base_pod(RestartPolicy::Always);
        let hash = pod.spec.containers[0].spec_hash();
        let status = status_with_container(pod.uid, ContainerState::Running, None, hash);
        let store = ProbeResultStore::new();
        let actions = compute_actions(&pod, Some(&status), &store, 1);
        assert!(actions.is_noop(), "{actions:?}");
        assert_eq!(pod.qos_class(), QosClass::BestEffort);
    }

    #[test]
    fn restart_never_with_clean_exit_never_restarts() {
        let pod = base_pod(RestartPolicy::Never);
        let hash = pod.spec.containers[0].spec_hash();
        let status = status_with_container(pod.uid, ContainerState::Exited, Some(0), hash);
        let store = ProbeResultStore::new();
        let actions = compute_actions(&pod, Some(&status), &store, 1);
        assert!(actions.containers_to_start.is_empty());
    }

    #[test]
    fn restart_on_failure_restarts_only_nonzero_exit() {
        let store = ProbeResultStore::new();

        let pod_ok = base_pod(RestartPolicy::OnFailure);
        let hash = pod_ok.spec.containers[0].spec_hash();
        let clean = status_with_container(pod_ok.uid, ContainerState::Exited, Some(0), hash);
        assert!(compute_actions(&pod_ok, Some(&clean), &store, 1).containers_to_start.is_empty());

        let pod_fail = base_pod(RestartPolicy::OnFailure);
        let hash2 = pod_fail.spec.containers[0].spec_hash();
        let failed = status_with_container(pod_fail.uid, ContainerState::Exited, Some(1), hash2);
        assert_eq!(
            compute_actions(&pod_fail, Some(&failed), &store, 1).containers_to_start,
            vec![0]
        );
    }

    #[test]
    fn liveness_failure_kills_and_restarts_container() {
        let pod = base_pod(RestartPolicy::Always);
        let hash = pod.spec.containers[0].spec_hash();
        let status = status_with_container(pod.uid, ContainerState::Running, None, hash);
        let store = ProbeResultStore::new();
        store.set(pod.uid, "c1", ProbeKind::Liveness, ProbeResult::Failure);

        let actions = compute_actions(&pod, Some(&status), &store, 1);
        assert!(actions.containers_to_kill.contains_key("c1-id"));
        assert_eq!(actions.containers_to_start, vec![0]);
    }

    #[tokio::test]
    async fn cold_start_falls_through_kill_pod_into_sandbox_and_container_creation() {
        let pod = base_pod(RestartPolicy::Always);
        let store = ProbeResultStore::new();
        let actions = compute_actions(&pod, None, &store, 0);
        assert!(actions.kill_pod);
        assert!(actions.create_sandbox);

        let runtime = crate::runtime::fake::FakeRuntime::new();
        let backoff = BackoffStore::new();
        let cancel = CancellationToken::new();
        let outcome = execute_actions(&runtime, &pod, &actions, None, None, &backoff, &cancel)
            .await
            .expect("cold start should succeed against a fresh fake runtime");

        assert!(outcome.new_sandbox_id.is_some());
        assert!(outcome.stages_completed.contains(&"create_sandbox"));
        assert!(outcome.stages_completed.contains(&"start_containers"));
        assert!(!runtime.container_ids_for_pod(pod.uid).is_empty());
    }

    #[test]
    fn spec_change_triggers_kill_and_restart() {
        let pod = base_pod(RestartPolicy::Always);
        let status = status_with_container(pod.uid, ContainerState::Running, None, 0xdead_beef);
        let store = ProbeResultStore::new();
        let actions = compute_actions(&pod, Some(&status), &store, 1);
        assert!(actions.containers_to_kill.contains_key("c1-id"));
        assert_eq!(actions.containers_to_start, vec![0]);
    }
}
