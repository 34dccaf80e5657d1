//! CSMS → charge point commands
//!
//! [`CommandDispatcher`] is the single entry point for operator-initiated
//! requests: it resolves the live session from the registry, builds the
//! typed `rust_ocpp` payload, sends the Call with a deadline, and maps the
//! reply back. No session means the command fails with
//! [`CommandError::NotConnected`] — commands are never queued.

pub mod dispatcher;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{AuthorizationState, DomainError};
use crate::session::CallFailure;

pub use dispatcher::{CommandDispatcher, SharedCommandDispatcher};

/// Default per-command reply deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reset kind for the Reset command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Soft,
    Hard,
}

/// Availability for ChangeAvailability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// Message kind for TriggerMessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Update mode for SendLocalList.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalListUpdate {
    Full,
    Differential,
}

/// One authorization entry for SendLocalList.
#[derive(Debug, Clone)]
pub struct LocalAuthEntry {
    pub id_tag: String,
    /// Defaults to Accepted when absent.
    pub status: Option<AuthorizationState>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_id_tag: Option<String>,
}

/// A configuration key returned by GetConfiguration.
#[derive(Debug, Clone)]
pub struct ConfigurationKey {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

/// GetConfiguration result.
#[derive(Debug)]
pub struct ConfigurationResult {
    pub configuration_key: Vec<ConfigurationKey>,
    pub unknown_key: Vec<String>,
}

/// DataTransfer result.
#[derive(Debug)]
pub struct DataTransferOutcome {
    pub status: String,
    pub data: Option<String>,
}

/// GetCompositeSchedule result.
#[derive(Debug)]
pub struct CompositeScheduleResult {
    pub status: String,
    pub connector_id: Option<i32>,
    pub schedule_start: Option<DateTime<Utc>>,
    /// The chargingSchedule object as raw JSON.
    pub schedule: Option<Value>,
}

/// Why an operator command failed.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// No live session for the charge point; no frame was emitted.
    #[error("Charge point '{0}' is not connected")]
    NotConnected(String),

    /// Rejected at the boundary before reaching the session.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Connection lost while awaiting reply")]
    ConnectionLost,

    /// The charge point answered with a CallError frame.
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },

    /// The reply payload did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<CallFailure> for CommandError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::CallError { code, description } => {
                Self::CallError { code, description }
            }
            CallFailure::Timeout(deadline) => Self::Timeout(deadline),
            CallFailure::ConnectionLost => Self::ConnectionLost,
        }
    }
}

impl From<DomainError> for CommandError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::InvalidRequest(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
