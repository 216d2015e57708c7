//! Shared fixtures for the scenario tests (§8 S1-S6).
//!
//! `start_mock_server` mirrors the teacher's `node/tests/common/utils.rs`
//! (a `wiremock::MockServer` with one `Mock` per HTTP verb this agent's
//! sinks actually use), widened from the teacher's single PATCH-status route
//! to this agent's status push, mirror upsert and mirror delete routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodeagentd::cache::PodCache;
use nodeagentd::types::pod::{ContainerSpec, Pod, PodSpec, RestartPolicy};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[allow(dead_code)]
pub async fn start_mock_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path_regex(r"^/pods/[^/]+$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/pods/[^/]+$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path_regex(r"^/pods/[^/]+$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    server
}

/// Drives `cache.update_time` on a short fixed period, standing in for the
/// production cache-ticker task so `PodCache::get_newer_than` (and anything
/// that blocks on it, e.g. per-pod workers) doesn't wait on a real PLEG.
#[allow(dead_code)]
pub fn spawn_cache_ticker(cache: Arc<PodCache>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(20));
        loop {
            tokio::select! {
                _ = tick.tick() => cache.update_time(chrono::Utc::now()),
                _ = cancel.cancelled() => return,
            }
        }
    })
}

#[allow(dead_code)]
pub fn container_spec(name: &str, image: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: image.to_string(),
        env: vec![],
        resources: Default::default(),
        startup_probe: None,
        readiness_probe: None,
        liveness_probe: None,
    }
}

#[allow(dead_code)]
pub fn simple_pod(name: &str, namespace: &str, containers: Vec<ContainerSpec>) -> Pod {
    Pod {
        uid: Uuid::new_v4(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        mirror: false,
        annotations: HashMap::new(),
        spec: PodSpec {
            containers,
            restart_policy: RestartPolicy::Always,
            ..Default::default()
        },
    }
}
