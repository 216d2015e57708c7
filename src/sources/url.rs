//! URL-polling pod source (§6 "URL source").
//!
//! Polls an HTTP endpoint on a fixed period for a JSON array of pod
//! manifests, the network analog of [`super::file::FileSource`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sources::{Op, Source, SourceUpdate};
use crate::types::pod::{PodSpec, ANNOTATION_CONFIG_HASH};
use crate::types::Pod;

const SOURCE_NAME: &str = "url";
const UID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6e, 0x6f, 0x64, 0x65, 0x2d, 0x61, 0x67, 0x65, 0x6e, 0x74, 0x2d, 0x75, 0x72, 0x6c, 0x00, 0x00,
]);

#[derive(Debug, Deserialize)]
struct PodManifest {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    spec: PodSpec,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Clone)]
pub struct UrlSource {
    endpoint: String,
    poll_period: Duration,
    client: reqwest::Client,
}

impl UrlSource {
    pub fn new(endpoint: impl Into<String>, poll_period: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            poll_period,
            client: reqwest::Client::new(),
        }
    }

    async fn poll(&self) -> Vec<Pod> {
        let body = match self.client.get(&self.endpoint).send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "url source: failed to read response body");
                    return Vec::new();
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, endpoint = %self.endpoint, "url source: poll failed");
                return Vec::new();
            }
        };

        let manifests: Vec<PodManifest> = match serde_json::from_str(&body) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(error = %err, "url source: rejecting malformed manifest list");
                return Vec::new();
            }
        };

        manifests
            .into_iter()
            .map(|manifest| {
                let hash_input = format!(
                    "{}|{}|{}|{}",
                    SOURCE_NAME, self.endpoint, manifest.name, manifest.namespace
                );
                let uid = Uuid::new_v5(&UID_NAMESPACE, hash_input.as_bytes());
                let content_hash = format!("{:x}", content_hash(&manifest));

                let mut annotations = HashMap::new();
                annotations.insert(ANNOTATION_CONFIG_HASH.to_string(), content_hash);

                Pod {
                    uid,
                    namespace: manifest.namespace,
                    name: manifest.name,
                    mirror: false,
                    annotations,
                    spec: manifest.spec,
                }
            })
            .collect()
    }
}

fn content_hash(manifest: &PodManifest) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    manifest.name.hash(&mut hasher);
    manifest.namespace.hash(&mut hasher);
    for c in &manifest.spec.containers {
        c.spec_hash().hash(&mut hasher);
    }
    hasher.finish()
}

#[async_trait]
impl Source for UrlSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SourceUpdate>,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        let mut interval = tokio::time::interval(self.poll_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pods = self.poll().await;
                    tracing::debug!(count = pods.len(), "url source polled");
                    if tx
                        .send(SourceUpdate {
                            source: SOURCE_NAME.to_string(),
                            op: Op::Set,
                            pods,
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}
