//! Runtime client facade (§4.A): a typed, cancelable view of the container
//! runtime.
//!
//! Modeled as a capability interface (§9 "Dynamic dispatch... via capability
//! interfaces") rather than a concrete struct, so the sync loop, PLEG and
//! probers can be tested against [`fake::FakeRuntime`] the same way the
//! teacher tests against `docker::test::TestDocker`.

pub mod docker;
pub mod fake;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::types::pod::ContainerSpec;
use crate::types::runtime::{ContainerEvent, ContainerStatus, RuntimeError, RuntimePodStatus};
use crate::types::PodUid;

/// Everything a correct runtime implementation must expose (§6 "Runtime RPC
/// contract"). Every call takes a cancellation token and should return
/// promptly on cancellation (§5).
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Returned API version; callers compare against their expected version
    /// and treat a mismatch as fatal at startup.
    async fn version(&self, cancel: &CancellationToken) -> Result<String, RuntimeError>;

    async fn list_pod_sandboxes(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PodUid, RuntimePodStatus)>, RuntimeError>;

    async fn pod_sandbox_status(
        &self,
        pod_uid: PodUid,
        cancel: &CancellationToken,
    ) -> Result<RuntimePodStatus, RuntimeError>;

    async fn run_pod_sandbox(
        &self,
        pod_uid: PodUid,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError>;

    async fn stop_pod_sandbox(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn remove_pod_sandbox(
        &self,
        sandbox_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), RuntimeError>;

    async fn create_container(
        &self,
        sandbox_id: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError>;

    async fn start_container(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    /// Stop honoring the grace-period bound described in §4.K. Callers
    /// escalate to a forced kill themselves if this does not return in time.
    async fn stop_container(
        &self,
        container_id: &str,
        grace: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn remove_container(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn container_status(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerStatus, RuntimeError>;

    /// Streamed lifecycle events (§6 `GetContainerEvents`). Implementations
    /// return a lazily-polled stream; dropping it stops the subscription.
    async fn container_events(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ContainerEvent, RuntimeError>>, RuntimeError>;

    async fn exec_probe(
        &self,
        container_id: &str,
        command: &[String],
        timeout: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, RuntimeError>;
}
