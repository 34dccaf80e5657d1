//! One live charge-point connection
//!
//! A session owns the outbound side of the socket (via the single-writer
//! channel drained by the connection's writer task), the pending-call
//! table, and the closed flag. The receive loop lives in the WebSocket
//! server and feeds frames back through [`Session::complete_call`] /
//! [`Session::fail_call`].

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::shared::ocpp_frame::OcppFrame;

use super::pending::PendingCallTable;
use super::CallFailure;

/// WebSocket subprotocol spoken on every session.
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// A live bidirectional OCPP-J session.
pub struct Session {
    charge_point_id: String,
    /// Single-writer path: the connection's writer task drains this
    /// channel, so concurrent callers never interleave bytes mid-frame.
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingCallTable,
    call_seq: AtomicU64,
    closed: AtomicBool,
    close_notify: Notify,
    connected_at: DateTime<Utc>,
    last_activity: AtomicI64,
}

impl Session {
    pub fn new(charge_point_id: impl Into<String>, outbound: mpsc::UnboundedSender<String>) -> Self {
        let now = Utc::now();
        Self {
            charge_point_id: charge_point_id.into(),
            outbound,
            pending: PendingCallTable::new(),
            call_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn charge_point_id(&self) -> &str {
        &self.charge_point_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Record inbound activity (any successfully received frame).
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let secs = self.last_activity.load(Ordering::Relaxed);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
    }

    // ── Outbound path ──────────────────────────────────────

    /// Queue a raw frame on the single-writer channel.
    pub fn send_frame(&self, text: String) -> Result<(), CallFailure> {
        if self.is_closed() {
            return Err(CallFailure::ConnectionLost);
        }
        self.outbound
            .send(text)
            .map_err(|_| CallFailure::ConnectionLost)
    }

    /// Send a Call and await the correlated reply.
    ///
    /// On timeout the waiter is removed first, so a late reply with the
    /// same uid resolves nothing and is dropped by the receive path.
    pub async fn call(
        &self,
        action: &str,
        payload: Value,
        deadline: Duration,
    ) -> Result<Value, CallFailure> {
        if self.is_closed() {
            return Err(CallFailure::ConnectionLost);
        }

        let unique_id = format!("CS-{}", self.call_seq.fetch_add(1, Ordering::SeqCst));
        let rx = self.pending.insert(&unique_id, action);

        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        info!(
            charge_point_id = self.charge_point_id.as_str(),
            action,
            message_id = unique_id.as_str(),
            "Sending command"
        );

        if self.outbound.send(frame.encode()).is_err() {
            self.pending.forget(&unique_id);
            return Err(CallFailure::ConnectionLost);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(reply)) => reply,
            // The waiter sender was dropped without a reply; only session
            // teardown does that.
            Ok(Err(_)) => Err(CallFailure::ConnectionLost),
            Err(_) => {
                self.pending.forget(&unique_id);
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    message_id = unique_id.as_str(),
                    "Command timed out"
                );
                Err(CallFailure::Timeout(deadline))
            }
        }
    }

    // ── Inbound correlation ────────────────────────────────

    /// Resolve a waiter with a CallResult payload.
    pub fn complete_call(&self, unique_id: &str, payload: Value) {
        match self.pending.complete(unique_id, Ok(payload)) {
            Some(action) => info!(
                charge_point_id = self.charge_point_id.as_str(),
                action = action.as_str(),
                message_id = unique_id,
                "Received response"
            ),
            None => warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id,
                "CallResult for unknown or timed-out id dropped"
            ),
        }
    }

    /// Resolve a waiter with a CallError.
    pub fn fail_call(&self, unique_id: &str, code: &str, description: &str) {
        let failure = CallFailure::CallError {
            code: code.to_string(),
            description: description.to_string(),
        };
        match self.pending.complete(unique_id, Err(failure)) {
            Some(action) => warn!(
                charge_point_id = self.charge_point_id.as_str(),
                action = action.as_str(),
                message_id = unique_id,
                error_code = code,
                "Received CallError"
            ),
            None => warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id,
                error_code = code,
                "CallError for unknown or timed-out id dropped"
            ),
        }
    }

    // ── Close ──────────────────────────────────────────────

    /// Idempotent close: drains every pending waiter with ConnectionLost
    /// and wakes the connection driver so the socket gets torn down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = self.pending.cancel_all(CallFailure::ConnectionLost);
        if drained > 0 {
            debug!(
                charge_point_id = self.charge_point_id.as_str(),
                drained, "Cancelled pending calls on close"
            );
        }
        info!(
            charge_point_id = self.charge_point_id.as_str(),
            "Session closed"
        );
        self.close_notify.notify_waiters();
    }

    /// Resolve once the session is closed (immediately if it already is).
    pub async fn wait_closed(&self) {
        while !self.is_closed() {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                break;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (Session, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new("CP1", tx), rx)
    }

    #[tokio::test]
    async fn call_resolves_on_matching_reply() {
        let (session, mut outbound) = session();

        let call = session.call("Reset", json!({"type": "Soft"}), Duration::from_secs(5));
        tokio::pin!(call);

        // Nothing resolved yet; grab the frame that went out.
        tokio::select! {
            _ = &mut call => panic!("call resolved before any reply"),
            frame = outbound.recv() => {
                let frame = frame.unwrap();
                let decoded = OcppFrame::decode(&frame).unwrap();
                match decoded {
                    OcppFrame::Call { unique_id, action, payload } => {
                        assert_eq!(action, "Reset");
                        assert_eq!(payload["type"], "Soft");
                        session.complete_call(&unique_id, json!({"status": "Accepted"}));
                    }
                    other => panic!("expected Call, got {:?}", other),
                }
            }
        }

        let reply = call.await.unwrap();
        assert_eq!(reply["status"], "Accepted");
        assert_eq!(session.pending_calls(), 0);
    }

    #[tokio::test]
    async fn call_error_reply_surfaces_code() {
        let (session, mut outbound) = session();

        let call = session.call("DataTransfer", json!({}), Duration::from_secs(5));
        tokio::pin!(call);

        tokio::select! {
            _ = &mut call => panic!("resolved early"),
            frame = outbound.recv() => {
                let decoded = OcppFrame::decode(&frame.unwrap()).unwrap();
                session.fail_call(decoded.unique_id(), "TypeConstraintViolation", "data must be a string");
            }
        }

        match call.await.unwrap_err() {
            CallFailure::CallError { code, .. } => assert_eq!(code, "TypeConstraintViolation"),
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_waiter_and_drops_late_reply() {
        let (session, mut outbound) = session();

        let result = session
            .call("Reset", json!({}), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(CallFailure::Timeout(_))));
        assert_eq!(session.pending_calls(), 0);

        // A late reply with the timed-out uid has no observable effect.
        let frame = outbound.recv().await.unwrap();
        let decoded = OcppFrame::decode(&frame).unwrap();
        session.complete_call(decoded.unique_id(), json!({"status": "Accepted"}));
        assert_eq!(session.pending_calls(), 0);
    }

    #[tokio::test]
    async fn close_cancels_in_flight_calls() {
        let (session, _outbound) = session();

        let call = session.call("Reset", json!({}), Duration::from_secs(30));
        tokio::pin!(call);

        tokio::select! {
            biased;
            _ = tokio::task::yield_now() => {}
            _ = &mut call => panic!("resolved early"),
        }

        session.close();
        assert!(matches!(call.await, Err(CallFailure::ConnectionLost)));
        assert!(session.is_closed());

        // Close is idempotent and later calls fail fast.
        session.close();
        let after = session.call("Reset", json!({}), Duration::from_secs(1)).await;
        assert!(matches!(after, Err(CallFailure::ConnectionLost)));
    }

    #[tokio::test]
    async fn unique_ids_are_distinct_per_call() {
        let (session, mut outbound) = session();

        let c1 = session.call("Heartbeat", json!({}), Duration::from_secs(5));
        let c2 = session.call("Heartbeat", json!({}), Duration::from_secs(5));
        tokio::pin!(c1);
        tokio::pin!(c2);

        let mut ids = Vec::new();
        for _ in 0..2 {
            tokio::select! {
                _ = &mut c1 => panic!("resolved early"),
                _ = &mut c2 => panic!("resolved early"),
                frame = outbound.recv() => {
                    let decoded = OcppFrame::decode(&frame.unwrap()).unwrap();
                    ids.push(decoded.unique_id().to_string());
                }
            }
        }
        assert_ne!(ids[0], ids[1]);

        session.complete_call(&ids[0], json!({}));
        session.complete_call(&ids[1], json!({}));
        assert!(c1.await.is_ok());
        assert!(c2.await.is_ok());
    }

    #[tokio::test]
    async fn wait_closed_resolves_after_close() {
        let (session, _outbound) = session();
        let session = std::sync::Arc::new(session);

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_closed().await })
        };
        session.close();
        waiter.await.unwrap();
    }
}
