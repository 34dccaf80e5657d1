//! OCPP-J message framing
//!
//! The OCPP-J transport wraps every message in a three- or five-element
//! JSON array:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! The unique id is chosen by the sender of the Call, must be non-empty,
//! at most [`MAX_UNIQUE_ID_LEN`] characters, and unique within the session.

use serde_json::Value;
use thiserror::Error;

/// Maximum length of an OCPP-J unique message id.
pub const MAX_UNIQUE_ID_LEN: usize = 36;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── CallErrorCode ──────────────────────────────────────────────

/// CALLERROR codes from the OCPP-J 1.6 vocabulary.
///
/// `FormationViolation` and `OccurenceConstraintViolation` carry the
/// specification's own spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl CallErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A decoded OCPP-J envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    /// Decode a raw text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let arr = value.as_array().ok_or(FrameError::NotAnArray)?;

        let msg_type = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or(FrameError::MissingMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => {
                expect_arity(arr, 4, "Call")?;
                let unique_id = decode_unique_id(&arr[1])?;
                let action = arr[2]
                    .as_str()
                    .filter(|a| !a.is_empty())
                    .ok_or(FrameError::InvalidAction)?
                    .to_string();
                let payload = decode_payload(&arr[3])?;
                Ok(Self::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            MSG_TYPE_CALL_RESULT => {
                expect_arity(arr, 3, "CallResult")?;
                let unique_id = decode_unique_id(&arr[1])?;
                let payload = decode_payload(&arr[2])?;
                Ok(Self::CallResult { unique_id, payload })
            }
            MSG_TYPE_CALL_ERROR => {
                // Some stations omit the description or details; tolerate
                // anything with at least a code.
                expect_arity(arr, 3, "CallError")?;
                let unique_id = decode_unique_id(&arr[1])?;
                let error_code = arr
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or("GenericError")
                    .to_string();
                let error_description = arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let error_details = match arr.get(4) {
                    Some(details) => decode_payload(details)?,
                    None => Value::Object(Default::default()),
                };
                Ok(Self::CallError {
                    unique_id,
                    error_code,
                    error_description,
                    error_details,
                })
            }
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Encode this frame as a compact JSON string.
    pub fn encode(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                MSG_TYPE_CALL.into(),
                unique_id.clone().into(),
                action.clone().into(),
                payload.clone(),
            ]),
            Self::CallResult { unique_id, payload } => Value::Array(vec![
                MSG_TYPE_CALL_RESULT.into(),
                unique_id.clone().into(),
                payload.clone(),
            ]),
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                MSG_TYPE_CALL_ERROR.into(),
                unique_id.clone().into(),
                error_code.clone().into(),
                error_description.clone().into(),
                error_details.clone(),
            ]),
        };
        // Serializing a Value to a string cannot fail.
        serde_json::to_string(&arr).unwrap()
    }

    /// Build a CallError reply for a given unique id.
    pub fn call_error(
        unique_id: impl Into<String>,
        code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: code.as_str().to_string(),
            error_description: description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Best-effort extraction of a unique id from a frame that failed to
    /// decode, so the peer can still be answered with a CallError.
    pub fn salvage_unique_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let id = value.as_array()?.get(1)?.as_str()?;
        if id.is_empty() || id.len() > MAX_UNIQUE_ID_LEN {
            return None;
        }
        Some(id.to_string())
    }
}

fn expect_arity(arr: &[Value], expected: usize, kind: &'static str) -> Result<(), FrameError> {
    if arr.len() < expected {
        return Err(FrameError::TooFewElements {
            kind,
            expected,
            got: arr.len(),
        });
    }
    Ok(())
}

fn decode_unique_id(value: &Value) -> Result<String, FrameError> {
    let id = value.as_str().ok_or(FrameError::InvalidUniqueId(
        "uniqueId must be a string",
    ))?;
    if id.is_empty() {
        return Err(FrameError::InvalidUniqueId("uniqueId must not be empty"));
    }
    if id.len() > MAX_UNIQUE_ID_LEN {
        return Err(FrameError::InvalidUniqueId(
            "uniqueId exceeds 36 characters",
        ));
    }
    Ok(id.to_string())
}

/// Payload slots must carry an object; a JSON `null` is tolerated and
/// normalized to `{}` (some stations send it for empty responses).
fn decode_payload(value: &Value) -> Result<Value, FrameError> {
    match value {
        Value::Object(_) => Ok(value.clone()),
        Value::Null => Ok(Value::Object(Default::default())),
        _ => Err(FrameError::PayloadNotAnObject),
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Why a raw frame could not be decoded.
///
/// Every variant maps to a `FormationViolation` CallError on the inbound
/// path; the enum exists so logs can say what exactly was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a JSON array")]
    NotAnArray,
    #[error("first element is not a message-type number")]
    MissingMessageType,
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("{kind} frame needs {expected} elements, got {got}")]
    TooFewElements {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid uniqueId: {0}")]
    InvalidUniqueId(&'static str),
    #[error("action must be a non-empty string")]
    InvalidAction,
    #[error("payload must be a JSON object")]
    PayloadNotAnObject,
}
