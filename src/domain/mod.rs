//! Domain layer - entities, value objects and the store façade

pub mod charger;
pub mod charging_profile;
pub mod data_transfer;
pub mod id_tag;
pub mod reservation;
pub mod store;
pub mod vendor;

pub use charger::{Charger, ConnectorEntry, LogEntry, LOG_CAP};
pub use charging_profile::{ClearChargingProfileCriteria, StoredChargingProfile};
pub use data_transfer::{DataTransferRecord, DataTransferTemplate};
pub use crate::shared::errors::{DomainError, DomainResult};
pub use id_tag::{AuthorizationState, IdTagEntry};
pub use reservation::Reservation;
pub use store::{ChargerMutation, ChargerStore};
pub use vendor::VendorSettings;
