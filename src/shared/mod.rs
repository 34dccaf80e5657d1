//! Cross-cutting utilities: error taxonomy, OCPP-J framing, shutdown
//! coordination, boundary validation.

pub mod errors;
pub mod ocpp_frame;
pub mod shutdown;
pub mod validations;

pub use errors::{CallRejection, DomainError, DomainResult};
pub use ocpp_frame::{CallErrorCode, FrameError, OcppFrame};
pub use shutdown::ShutdownSignal;
