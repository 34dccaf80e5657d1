//! WebSocket delivery

pub mod server;

pub use server::{OcppServer, ServerConfig};
