//! Error taxonomy
//!
//! Domain-level failures and their mapping onto the OCPP-J CALLERROR
//! vocabulary. Inbound handlers bubble [`DomainError`]s up with `?`; the
//! conversion below decides the CALLERROR code the charge point sees.
//! The operator-facing counterpart lives with `CommandError` in the
//! commands module.

use thiserror::Error;

use super::ocpp_frame::CallErrorCode;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Charger not found: {0}")]
    ChargerNotFound(String),

    #[error("Id tag not found: {0}")]
    IdTagNotFound(String),

    #[error("Data transfer template not found: {0}")]
    TemplateNotFound(i32),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// A rejected inbound Call, answered with a CALLERROR frame.
#[derive(Debug)]
pub struct CallRejection {
    pub code: CallErrorCode,
    pub description: String,
}

impl CallRejection {
    pub fn new(code: CallErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(
            CallErrorCode::NotImplemented,
            format!("Action '{}' is not supported", action),
        )
    }
}

impl From<DomainError> for CallRejection {
    fn from(err: DomainError) -> Self {
        let code = match &err {
            DomainError::Validation(_) => CallErrorCode::PropertyConstraintViolation,
            _ => CallErrorCode::InternalError,
        };
        Self {
            code,
            description: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_internal_error() {
        let rejection = CallRejection::from(DomainError::Storage("disk full".to_string()));
        assert_eq!(rejection.code, CallErrorCode::InternalError);
        assert!(rejection.description.contains("disk full"));
    }

    #[test]
    fn validation_errors_map_to_property_constraint() {
        let rejection =
            CallRejection::from(DomainError::Validation("idTag too long".to_string()));
        assert_eq!(rejection.code, CallErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn missing_charger_maps_to_internal_error() {
        let rejection = CallRejection::from(DomainError::ChargerNotFound("CP1".to_string()));
        assert_eq!(rejection.code, CallErrorCode::InternalError);
        assert!(rejection.description.contains("CP1"));
    }

    #[test]
    fn not_implemented_names_the_action() {
        let rejection = CallRejection::not_implemented("MadeUpAction");
        assert_eq!(rejection.code, CallErrorCode::NotImplemented);
        assert!(rejection.description.contains("MadeUpAction"));
    }
}
