//! Application services - operator surface and background tasks

pub mod charge_point;
pub mod reservation_expiry;
pub mod session_sweeper;

pub use charge_point::ChargePointService;
pub use reservation_expiry::start_reservation_expiry_task;
pub use session_sweeper::{start_session_sweeper, SweeperConfig};
