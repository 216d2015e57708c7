//! Pod source multiplexer (§4.E): merges SET/ADD/UPDATE/DELETE/REMOVE/
//! RECONCILE streams from N sources into one normalized stream.

pub mod file;
pub mod mux;
pub mod sink_watch;
pub mod url;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::Pod;

/// Operation a source (or the mux's own SET-diffing) attaches to a batch of
/// pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Update,
    Delete,
    Remove,
    Set,
    Reconcile,
}

/// One message out of a source (raw) or out of the mux (normalized — never
/// `Set`, the mux always resolves that into the synthetic ops before
/// forwarding).
#[derive(Debug, Clone)]
pub struct SourceUpdate {
    pub source: String,
    pub op: Op,
    pub pods: Vec<Pod>,
}

/// A capability interface (§9): anything that emits `(op, pods)` records on
/// a channel until canceled.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<SourceUpdate>,
        cancel: CancellationToken,
    ) -> Result<(), String>;
}
