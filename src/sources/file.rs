//! Filesystem pod source (§6 "Filesystem source").
//!
//! Watches a directory of YAML/JSON pod manifests, rescanning on a fixed
//! period. Pod UID is derived deterministically from `(source, path,
//! content)` so the same file always maps to the same UID across restarts —
//! this is what lets `config-hash` changes be detected as `UPDATE` rather
//! than `ADD`+`REMOVE`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sources::{Op, Source, SourceUpdate};
use crate::types::pod::{PodSpec, ANNOTATION_CONFIG_HASH};
use crate::types::Pod;

const SOURCE_NAME: &str = "file";
/// Arbitrary fixed namespace UUID so `Uuid::new_v5` is reproducible across runs.
const UID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6e, 0x6f, 0x64, 0x65, 0x2d, 0x61, 0x67, 0x65, 0x6e, 0x74, 0x2d, 0x66, 0x69, 0x6c, 0x65, 0x00,
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
pub struct FileSource {
    dir: PathBuf,
    rescan_period: Duration,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, rescan_period: Duration) -> Self {
        Self {
            dir: dir.into(),
            rescan_period,
        }
    }

    fn scan(&self) -> Vec<Pod> {
        let mut pods = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "could not read pod manifest directory");
                return pods;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_manifest(&path) {
                continue;
            }
            match parse_manifest(&path) {
                Ok(pod) => pods.push(pod),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "rejecting invalid pod manifest");
                }
            }
        }
        pods
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

fn parse_manifest(path: &Path) -> Result<Pod, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let manifest: PodManifest = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&content).map_err(|e| e.to_string())?
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())?
    };

    let hash_input = format!("{}|{}|{}", SOURCE_NAME, path.display(), content);
    let uid = Uuid::new_v5(&UID_NAMESPACE, hash_input.as_bytes());
    let content_hash = format!("{:x}", seahash_like(&content));

    let mut annotations = HashMap::new();
    annotations.insert(ANNOTATION_CONFIG_HASH.to_string(), content_hash);

    Ok(Pod {
        uid,
        namespace: manifest.namespace,
        name: manifest.name,
        mirror: false,
        annotations,
        spec: manifest.spec,
    })
}

/// Cheap content hash for the `config-hash` annotation; not cryptographic,
/// just needs to change whenever the file's bytes change.
fn seahash_like(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SourceUpdate>,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        let mut interval = tokio::time::interval(self.rescan_period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pods = self.scan();
                    tracing::debug!(count = pods.len(), "file source rescanned");
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
