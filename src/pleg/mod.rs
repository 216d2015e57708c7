//! Pod lifecycle event generator (§4.F): two cooperating implementations —
//! an evented fast path and a generic relisting fallback — sharing one
//! `active` flag so exactly one drives the pod cache at a time.

pub mod evented;
pub mod generic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::PodCache;
use crate::runtime::RuntimeClient;
use crate::types::event::LifecycleEvent;

use evented::EventedPleg;
use generic::GenericPleg;

pub struct PlegConfig {
    pub relist_period: Duration,
    pub relist_threshold: Duration,
    pub evented_tick_period: Duration,
    pub max_stream_retries: u32,
}

/// Runs both PLEG implementations concurrently, guarded so only the active
/// one writes to the cache. When the evented path exhausts its retry budget
/// it clears `active`, handing the cache over to the generic relister for
/// the rest of the process lifetime (§4.F: "stop the evented path and fall
/// back to the generic relister").
pub struct PlegSupervisor {
    generic: Arc<GenericPleg>,
    evented: Arc<EventedPleg>,
    active: Arc<AtomicBool>,
    relist_threshold: Duration,
}

impl PlegSupervisor {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        cache: Arc<PodCache>,
        event_tx: mpsc::Sender<LifecycleEvent>,
        config: PlegConfig,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let generic = Arc::new(GenericPleg::new(
            runtime.clone(),
            cache.clone(),
            event_tx.clone(),
            config.relist_period,
            active.clone(),
        ));
        let evented = Arc::new(EventedPleg::new(
            runtime,
            cache,
            event_tx,
            config.evented_tick_period,
            config.max_stream_retries,
            active.clone(),
        ));
        Self {
            generic,
            evented,
            active,
            relist_threshold: config.relist_threshold,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let generic = self.generic.clone();
        let evented = self.evented.clone();
        let cancel_generic = cancel.clone();
        let cancel_evented = cancel.clone();

        let generic_task = crate::supervise::supervise("pleg-generic", move || {
            let generic = generic.clone();
            let cancel = cancel_generic.clone();
            async move { generic.run(cancel).await }
        });
        let evented_task = crate::supervise::supervise("pleg-evented", move || {
            let evented = evented.clone();
            let cancel = cancel_evented.clone();
            async move { evented.run(cancel).await }
        });

        tokio::join!(generic_task, evented_task);
    }

    /// Unhealthy iff the evented path is stalled (falls through to generic's
    /// own health check, which is what actually drives the cache once
    /// evented has given up) or generic relisting has gone stale while it is
    /// the active driver.
    pub fn healthy(&self) -> bool {
        if self.active.load(Ordering::SeqCst) {
            self.evented.healthy()
        } else {
            self.generic.healthy(self.relist_threshold)
        }
    }
}
