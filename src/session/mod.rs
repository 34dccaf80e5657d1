//! Session layer - live connections, pending-call correlation, registry

pub mod pending;
pub mod registry;
pub mod session;

use std::time::Duration;

use thiserror::Error;

pub use pending::{CallReply, PendingCallTable};
pub use registry::{SessionRegistry, SharedSessionRegistry};
pub use session::{Session, OCPP_SUBPROTOCOL};

/// Why an outbound call produced no result payload.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The charge point answered with a CallError frame.
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },

    /// No reply arrived before the deadline; the waiter was removed and a
    /// late reply will be dropped.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The session closed (socket loss, eviction or shutdown) while the
    /// call was in flight, or the frame could not be queued at all.
    #[error("connection lost")]
    ConnectionLost,
}
