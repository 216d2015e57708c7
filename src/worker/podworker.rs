//! Per-pod worker state machine (§4.J steps 1-6).
//!
//! Shaped like the teacher's `worker::run` per-item task, but long-lived
//! (one task per pod UID for the pod's whole lifetime) and driven by a
//! mailbox instead of a single fire-and-forget spawn per update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffStore;
use crate::cache::PodCache;
use crate::pod_manager::PodManager;
use crate::probes::store::ProbeResultStore;
use crate::runtime::RuntimeClient;
use crate::status::sink::{PodPhase, PodStatusUpdate};
use crate::status::StatusManager;
use crate::sync_pod::{self, PodActions};
use crate::types::pod::PodUid;
use crate::types::runtime::{ContainerState, RuntimePodStatus};

use super::{UpdateRecord, UpdateType};
use super::mailbox::Mailbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Syncing,
    Terminating,
}

#[derive(Clone)]
pub struct PodWorkerContext {
    pub uid: PodUid,
    pub cache: Arc<PodCache>,
    pub pod_manager: Arc<PodManager>,
    pub runtime: Arc<dyn RuntimeClient>,
    pub status_manager: Arc<StatusManager>,
    pub probe_store: Arc<ProbeResultStore>,
    pub backoff: Arc<BackoffStore>,
    pub mailbox: Arc<Mailbox>,
    /// Notifies the dispatcher's single-owner registry (and prober manager)
    /// that this worker has fully reclaimed its pod and is about to exit.
    pub reaped_tx: mpsc::Sender<PodUid>,
}

/// Drives one pod from its first `create`/`update` to full teardown. Exits
/// once the pod is confirmed reclaimed or the token is cancelled.
pub async fn run(ctx: PodWorkerContext, cancel: CancellationToken) {
    let mut phase = Phase::Idle;
    let mut attempt: u32 = 0;
    let mut last_sync_time: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

    loop {
        let Some(record) = ctx.mailbox.recv(&cancel).await else {
            return;
        };

        match record.update_type {
            UpdateType::Terminated => {
                reclaim(&ctx).await;
                return;
            }
            UpdateType::Terminate => {
                phase = Phase::Terminating;
                if terminate_pod(&ctx, record.grace_override, &cancel).await {
                    reclaim(&ctx).await;
                    return;
                }
            }
            UpdateType::Create | UpdateType::Update | UpdateType::Sync => {
                if phase == Phase::Terminating {
                    if terminate_pod(&ctx, record.grace_override, &cancel).await {
                        reclaim(&ctx).await;
                        return;
                    }
                    continue;
                }
                phase = Phase::Syncing;
                sync_once(&ctx, &mut attempt, &mut last_sync_time, &cancel).await;
                phase = Phase::Idle;
            }
        }
    }
}

/// Blocks (via [`PodCache::get_newer_than`]) until the cache has something
/// newer than the last sync before reading `observed`, so a sync never acts
/// on a snapshot it has already acted on.
async fn sync_once(
    ctx: &PodWorkerContext,
    attempt: &mut u32,
    last_sync_time: &mut DateTime<Utc>,
    cancel: &CancellationToken,
) {
    let Some(pod) = ctx.pod_manager.get_by_uid(ctx.uid) else {
        tracing::debug!(pod_uid = %ctx.uid, "sync skipped: pod no longer desired");
        return;
    };

    let tau = *last_sync_time;
    let entry = ctx.cache.get_newer_than(ctx.uid, tau, cancel).await;
    if cancel.is_cancelled() {
        return;
    }
    *last_sync_time = Utc::now();
    let observed = entry.and_then(|e| e.status);

    let actions = sync_pod::compute_actions(&pod, observed.as_ref(), &ctx.probe_store, *attempt);
    *attempt = actions.attempt;

    match sync_pod::execute_actions(
        ctx.runtime.as_ref(),
        &pod,
        &actions,
        observed.as_ref(),
        None,
        &ctx.backoff,
        cancel,
    )
    .await
    {
        Ok(_) => {
            let update = PodStatusUpdate {
                full_name: pod.full_name(),
                phase: derive_phase(&actions, observed.as_ref()),
                container_statuses: status_pairs(observed.as_ref()),
                resource_version: None,
            };
            ctx.status_manager.set(ctx.uid, update);
        }
        Err(err) => {
            tracing::warn!(pod_uid = %ctx.uid, error = %err, "pod sync failed");
        }
    }
}

/// Issues a kill if the runtime still reports a live sandbox/containers;
/// returns `true` once the runtime confirms the pod is fully torn down.
async fn terminate_pod(ctx: &PodWorkerContext, grace_override: Option<Duration>, cancel: &CancellationToken) -> bool {
    let Some(pod) = ctx.pod_manager.get_by_uid(ctx.uid) else {
        return true;
    };
    let observed = ctx.cache.get(ctx.uid).and_then(|e| e.status);
    if is_torn_down(observed.as_ref()) {
        return true;
    }

    let actions = PodActions {
        kill_pod: true,
        ..Default::default()
    };
    if let Err(err) = sync_pod::execute_actions(
        ctx.runtime.as_ref(),
        &pod,
        &actions,
        observed.as_ref(),
        grace_override,
        &ctx.backoff,
        cancel,
    )
    .await
    {
        tracing::warn!(pod_uid = %ctx.uid, error = %err, "terminate attempt failed, will retry");
    }
    false
}

fn is_torn_down(observed: Option<&RuntimePodStatus>) -> bool {
    observed
        .map(|s| s.sandboxes.is_empty() && s.containers.is_empty())
        .unwrap_or(true)
}

async fn reclaim(ctx: &PodWorkerContext) {
    tracing::info!(pod_uid = %ctx.uid, "pod reclaimed");
    ctx.pod_manager.delete(ctx.uid);
    ctx.cache.delete(ctx.uid);
    ctx.probe_store.forget_pod(ctx.uid);
    ctx.backoff.forget_pod(ctx.uid);
    ctx.status_manager.forget(ctx.uid);
    let _ = ctx.reaped_tx.send(ctx.uid).await;
}

fn derive_phase(actions: &PodActions, observed: Option<&RuntimePodStatus>) -> PodPhase {
    let Some(status) = observed else {
        return PodPhase::Pending;
    };
    if status.containers.iter().any(|c| c.state == ContainerState::Running) {
        return PodPhase::Running;
    }
    if actions.kill_pod && status.containers.iter().all(|c| c.exit_code == Some(0)) {
        return PodPhase::Succeeded;
    }
    if status.containers.iter().any(|c| matches!(c.exit_code, Some(code) if code != 0)) {
        return PodPhase::Failed;
    }
    PodPhase::Pending
}

fn status_pairs(observed: Option<&RuntimePodStatus>) -> Vec<(String, String)> {
    observed
        .map(|s| {
            s.containers
                .iter()
                .map(|c| (c.spec_name.clone(), format!("{:?}", c.state)))
                .collect()
        })
        .unwrap_or_default()
}
