//! Sink-watch pod source (§6 "Sink source").
//!
//! Long-lived watch against the central store, grounded directly in the
//! teacher's `controller::watch` (NDJSON over a streamed GET, read line by
//! line via `StreamReader`/`BufReader`). Emits an initial `Set` from a plain
//! list call, then streams `Add`/`Update`/`Delete` as they arrive.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::sources::{Op, Source, SourceUpdate};
use crate::types::Pod;

const SOURCE_NAME: &str = "sink";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct SinkEvent {
    event_type: SinkEventType,
    pod: Pod,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
enum SinkEventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone)]
pub struct SinkWatchSource {
    base_url: String,
    node_name: String,
    client: reqwest::Client,
}

impl SinkWatchSource {
    pub fn new(base_url: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            node_name: node_name.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn list(&self) -> Result<Vec<Pod>, String> {
        let url = format!("{}/pods?nodeName={}", self.base_url, self.node_name);
        let resp = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("list failed: HTTP {}", resp.status()));
        }
        resp.json::<Vec<Pod>>().await.map_err(|e| e.to_string())
    }

    async fn watch_once(&self, tx: &mpsc::Sender<SourceUpdate>, cancel: &CancellationToken) -> Result<(), String> {
        let url = format!("{}/pods?nodeName={}&watch=true", self.base_url, self.node_name);
        let resp = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("watch request failed: HTTP {}", resp.status()));
        }

        let byte_stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e));
        let stream_reader = StreamReader::new(byte_stream);
        let mut lines = BufReader::new(stream_reader).lines();

        loop {
            let next_line = tokio::select! {
                line = lines.next_line() => line,
                _ = cancel.cancelled() => return Ok(()),
            };
            let Some(line) = next_line.map_err(|e| e.to_string())? else {
                return Err("watch stream ended".to_string());
            };
            let event: SinkEvent = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(line = %line, error = %err, "sink watch: dropping malformed event");
                    continue;
                }
            };
            let op = match event.event_type {
                SinkEventType::Added => Op::Add,
                SinkEventType::Modified => Op::Update,
                SinkEventType::Deleted => Op::Delete,
            };
            if tx
                .send(SourceUpdate {
                    source: SOURCE_NAME.to_string(),
                    op,
                    pods: vec![event.pod],
                })
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Source for SinkWatchSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SourceUpdate>,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        match self.list().await {
            Ok(pods) => {
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
            Err(err) => tracing::warn!(error = %err, "sink watch: initial list failed"),
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if let Err(err) = self.watch_once(&tx, &cancel).await {
                tracing::warn!(error = %err, "sink watch stream error, reconnecting");
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}
