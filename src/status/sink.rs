//! Status sink contract (§6 "Status sink contract").
//!
//! `HttpStatusSink` is grounded directly in the teacher's `sync.rs`
//! (`Client::new()` + `client.patch(...).json(&update).send()`), generalized
//! to carry and check a resource version.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

use crate::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodStatusUpdate {
    pub full_name: String,
    pub phase: PodPhase,
    pub container_statuses: Vec<(String, String)>,
    pub resource_version: Option<String>,
}

/// Push-with-version-checking sink (§6). A `Conflict` error means the
/// caller should reload desired state and retry (§7).
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn push(&self, update: &PodStatusUpdate) -> Result<(), AgentError>;
}

pub struct HttpStatusSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStatusSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn push(&self, update: &PodStatusUpdate) -> Result<(), AgentError> {
        let url = format!("{}/pods/{}", self.base_url, update.full_name);
        let resp = self
            .client
            .patch(&url)
            .json(update)
            .send()
            .await
            .map_err(|err| AgentError::transient(err.to_string()))?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(AgentError::conflict("resource version conflict"));
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AgentError::not_found("pod not found at sink"));
        }
        if !resp.status().is_success() {
            return Err(AgentError::transient(format!("status push failed: HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// In-memory test double recording every accepted push.
#[derive(Default)]
pub struct FakeSink {
    pub pushed: Mutex<Vec<PodStatusUpdate>>,
    pub fail_next: Mutex<bool>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusSink for FakeSink {
    async fn push(&self, update: &PodStatusUpdate) -> Result<(), AgentError> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(AgentError::transient("forced failure"));
        }
        self.pushed.lock().unwrap().push(update.clone());
        Ok(())
    }
}
