//! Application layer - inbound handlers, outbound commands, services

pub mod commands;
pub mod handlers;
pub mod scheduler;
pub mod services;

pub use commands::{CommandDispatcher, CommandError, SharedCommandDispatcher};
pub use handlers::OcppRouter;
pub use scheduler::PostTransactionScheduler;
pub use services::ChargePointService;
