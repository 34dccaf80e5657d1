//! Pending-call table
//!
//! Maps each outbound unique id to the waiter expecting the matching
//! CallResult / CallError. Owned by one session, never shared across
//! sessions. Every waiter is resolved exactly once: by reply, by the
//! caller's timeout removal, or by `cancel_all` on session close.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use super::CallFailure;

/// What a waiter eventually receives.
pub type CallReply = Result<Value, CallFailure>;

struct PendingCall {
    action: String,
    armed_at: DateTime<Utc>,
    waiter: oneshot::Sender<CallReply>,
}

/// uid → waiter map for one session.
#[derive(Default)]
pub struct PendingCallTable {
    entries: DashMap<String, PendingCall>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a waiter for `unique_id`. Ids are generated by a per-session
    /// counter, so a collision is a programming error.
    pub fn insert(&self, unique_id: &str, action: &str) -> oneshot::Receiver<CallReply> {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.insert(
            unique_id.to_string(),
            PendingCall {
                action: action.to_string(),
                armed_at: Utc::now(),
                waiter: tx,
            },
        );
        debug_assert!(previous.is_none(), "duplicate pending-call uid {unique_id}");
        rx
    }

    /// Resolve the waiter for `unique_id`. Returns the action name when a
    /// waiter existed, `None` for unknown (or already timed-out) ids.
    pub fn complete(&self, unique_id: &str, reply: CallReply) -> Option<String> {
        let (_, pending) = self.entries.remove(unique_id)?;
        let _ = pending.waiter.send(reply);
        Some(pending.action)
    }

    /// Remove a waiter without resolving it (timeout path). Late replies
    /// for the id will find no waiter and be dropped.
    pub fn forget(&self, unique_id: &str) -> bool {
        self.entries.remove(unique_id).is_some()
    }

    /// Fail every waiter with `reason`; returns how many were drained.
    pub fn cancel_all(&self, reason: CallFailure) -> usize {
        let uids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for uid in uids {
            if let Some((_, pending)) = self.entries.remove(&uid) {
                let _ = pending.waiter.send(Err(reason.clone()));
                drained += 1;
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Age of the oldest in-flight call, if any.
    pub fn oldest_armed_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.armed_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn waiter_receives_reply() {
        let table = PendingCallTable::new();
        let rx = table.insert("CS-1", "Reset");

        let action = table.complete("CS-1", Ok(json!({"status": "Accepted"})));
        assert_eq!(action.as_deref(), Some("Reset"));

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply["status"], "Accepted");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn complete_unknown_uid_is_noop() {
        let table = PendingCallTable::new();
        assert!(table.complete("nope", Ok(json!({}))).is_none());
    }

    #[tokio::test]
    async fn forgotten_waiter_sees_channel_close() {
        let table = PendingCallTable::new();
        let rx = table.insert("CS-1", "Reset");
        assert!(table.forget("CS-1"));
        // The sender is dropped; the waiter observes closure, not a value.
        assert!(rx.await.is_err());
        // A late reply for the same uid resolves nothing.
        assert!(table.complete("CS-1", Ok(json!({}))).is_none());
    }

    #[tokio::test]
    async fn cancel_all_fails_every_waiter() {
        let table = PendingCallTable::new();
        let rx1 = table.insert("CS-1", "Reset");
        let rx2 = table.insert("CS-2", "ClearCache");

        assert_eq!(table.cancel_all(CallFailure::ConnectionLost), 2);
        assert!(matches!(rx1.await.unwrap(), Err(CallFailure::ConnectionLost)));
        assert!(matches!(rx2.await.unwrap(), Err(CallFailure::ConnectionLost)));
        assert!(table.is_empty());
    }
}
