//! Probe execution (§4.H): dispatches a single probe attempt to the runtime
//! facade (exec probes) or a direct network check (HTTP/TCP/gRPC probes),
//! mirroring the CRI's split between exec-in-container and kubelet-side
//! network probes.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::runtime::RuntimeClient;
use crate::types::pod::{ProbeAction, ProbeSpec};

/// Runs one attempt of `spec` against `container_id`, returning whether it
/// succeeded. Network errors, non-2xx/3xx HTTP statuses, and timeouts all
/// count as failure; callers accumulate these into threshold counts.
pub async fn execute_probe(
    runtime: &dyn RuntimeClient,
    container_id: &str,
    pod_ip: Option<&str>,
    spec: &ProbeSpec,
    cancel: &CancellationToken,
) -> bool {
    let timeout = Duration::from_secs(spec.timeout_seconds.max(1));
    match &spec.kind {
        ProbeAction::Exec { command } => runtime
            .exec_probe(container_id, command, timeout, cancel)
            .await
            .unwrap_or(false),
        ProbeAction::Http { path, port } => {
            let Some(ip) = pod_ip else { return false };
            let url = format!("http://{ip}:{port}{path}");
            probe_http(&url, timeout).await
        }
        ProbeAction::Tcp { port } => {
            let Some(ip) = pod_ip else { return false };
            probe_tcp(ip, *port, timeout).await
        }
        ProbeAction::Grpc { port } => {
            // No gRPC health-checking client in the dependency stack; a
            // successful TCP handshake is treated as a coarse proxy.
            let Some(ip) = pod_ip else { return false };
            probe_tcp(ip, *port, timeout).await
        }
    }
}

async fn probe_http(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
        Err(_) => false,
    }
}

async fn probe_tcp(ip: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{ip}:{port}");
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
