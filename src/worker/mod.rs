//! Per-pod worker subsystem (§4.J): a dispatcher fans normalized updates out
//! to one long-lived task per pod UID, each holding a small mailbox.

pub mod dispatcher;
pub mod mailbox;
pub mod podworker;

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::pod::PodUid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Create,
    Update,
    Sync,
    Terminate,
    Terminated,
}

/// `(UID, type, timestamp, optional grace-period-override, optional
/// kill-reason)` (§4.J).
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub uid: PodUid,
    pub update_type: UpdateType,
    pub timestamp: DateTime<Utc>,
    pub grace_override: Option<Duration>,
    pub kill_reason: Option<String>,
}

impl UpdateRecord {
    pub fn new(uid: PodUid, update_type: UpdateType, timestamp: DateTime<Utc>) -> Self {
        Self {
            uid,
            update_type,
            timestamp,
            grace_override: None,
            kill_reason: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace_override = Some(grace);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.kill_reason = Some(reason.into());
        self
    }
}
