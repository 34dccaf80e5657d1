//! # CSMS Core
//!
//! OCPP 1.6J Central System: a WebSocket server managing long-lived
//! bidirectional charge-point sessions, the inbound protocol engine, and
//! the typed operator command surface.
//!
//! ## Architecture
//!
//! - **shared**: Cross-cutting utilities (OCPP-J framing, shutdown,
//!   boundary validation)
//! - **domain**: Charger aggregate, id-tags, reservations, charging-profile
//!   mirror, vendor settings, and the store façade trait
//! - **infrastructure**: Store implementations (in-memory, JSON snapshot)
//! - **session**: Live connections, pending-call correlation, the
//!   connection registry
//! - **application**: Inbound action handlers, the outbound command
//!   dispatcher, the post-transaction vendor scheduler
//! - **interfaces**: WebSocket delivery
//! - **config**: TOML-based configuration

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod session;
pub mod shared;

pub use application::{
    ChargePointService, CommandDispatcher, CommandError, OcppRouter, PostTransactionScheduler,
};
pub use config::{default_config_path, AppConfig};
pub use domain::ChargerStore;
pub use infrastructure::InMemoryStore;
pub use interfaces::ws::{OcppServer, ServerConfig};
pub use session::{SessionRegistry, SharedSessionRegistry};
pub use shared::ShutdownSignal;
