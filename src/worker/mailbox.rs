//! Per-pod mailbox (§4.J merge rules, boundary behavior 8).
//!
//! One pending record per pod, coalesced on send — the same "latest wins,
//! single slot" shape as [`crate::cache::PodCache`], specialized with the
//! merge table instead of a plain overwrite.

use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{UpdateRecord, UpdateType};

#[derive(Default)]
pub struct Mailbox {
    slot: Mutex<Option<UpdateRecord>>,
    notify: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, record: UpdateRecord) {
        let mut slot = self.slot.lock().unwrap();
        let merged = match slot.take() {
            None => record,
            Some(existing) => merge(existing, record),
        };
        *slot = Some(merged);
        drop(slot);
        self.notify.notify_one();
    }

    /// Waits for a record, returning `None` only if `cancel` fires first.
    pub async fn recv(&self, cancel: &CancellationToken) -> Option<UpdateRecord> {
        loop {
            if let Some(record) = self.slot.lock().unwrap().take() {
                return Some(record);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }
}

/// §4.J: "terminate + anything -> terminate with the shorter grace period;
/// terminated overrides everything; update + sync -> update; otherwise
/// newest wins."
fn merge(existing: UpdateRecord, incoming: UpdateRecord) -> UpdateRecord {
    use UpdateType::*;

    if existing.update_type == Terminated {
        return existing;
    }
    if incoming.update_type == Terminated {
        return incoming;
    }

    if existing.update_type == Terminate || incoming.update_type == Terminate {
        let grace = match (existing.grace_override, incoming.grace_override) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let newest = if incoming.timestamp >= existing.timestamp {
            &incoming
        } else {
            &existing
        };
        return UpdateRecord {
            uid: newest.uid,
            update_type: Terminate,
            timestamp: newest.timestamp,
            grace_override: grace,
            kill_reason: newest.kill_reason.clone(),
        };
    }

    if matches!(
        (existing.update_type, incoming.update_type),
        (Update, Sync) | (Sync, Update)
    ) {
        let newest = if incoming.timestamp >= existing.timestamp {
            incoming
        } else {
            existing
        };
        return UpdateRecord {
            update_type: Update,
            ..newest
        };
    }

    incoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(uid: uuid::Uuid, kind: UpdateType) -> UpdateRecord {
        UpdateRecord::new(uid, kind, Utc::now())
    }

    #[tokio::test]
    async fn update_then_terminate_before_wake_yields_terminate_only() {
        let uid = Uuid::new_v4();
        let mailbox = Mailbox::new();
        mailbox.send(record(uid, UpdateType::Update));
        mailbox.send(record(uid, UpdateType::Terminate).with_grace(std::time::Duration::from_secs(5)));

        let cancel = CancellationToken::new();
        let received = mailbox.recv(&cancel).await.unwrap();
        assert_eq!(received.update_type, UpdateType::Terminate);
        assert!(mailbox.slot.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn two_terminates_keep_shorter_grace() {
        let uid = Uuid::new_v4();
        let mailbox = Mailbox::new();
        mailbox.send(record(uid, UpdateType::Terminate).with_grace(std::time::Duration::from_secs(30)));
        mailbox.send(record(uid, UpdateType::Terminate).with_grace(std::time::Duration::from_secs(5)));

        let cancel = CancellationToken::new();
        let received = mailbox.recv(&cancel).await.unwrap();
        assert_eq!(received.grace_override, Some(std::time::Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn update_then_sync_collapses_to_update() {
        let uid = Uuid::new_v4();
        let mailbox = Mailbox::new();
        mailbox.send(record(uid, UpdateType::Update));
        mailbox.send(record(uid, UpdateType::Sync));

        let cancel = CancellationToken::new();
        let received = mailbox.recv(&cancel).await.unwrap();
        assert_eq!(received.update_type, UpdateType::Update);
    }

    #[tokio::test]
    async fn terminated_overrides_pending_update() {
        let uid = Uuid::new_v4();
        let mailbox = Mailbox::new();
        mailbox.send(record(uid, UpdateType::Update));
        mailbox.send(record(uid, UpdateType::Terminated));

        let cancel = CancellationToken::new();
        let received = mailbox.recv(&cancel).await.unwrap();
        assert_eq!(received.update_type, UpdateType::Terminated);
    }

    #[tokio::test]
    async fn recv_returns_none_on_cancel() {
        let mailbox = Mailbox::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(mailbox.recv(&cancel).await.is_none());
    }
}
