//! Connector reservations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reservation mirrored from an accepted ReserveNow command.
///
/// Expired entries are pruned lazily on the read path; cancellation and
/// consumption by StartTransaction remove them eagerly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: i32,
    /// Connector the reservation applies to (0 = any connector).
    pub connector_id: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        reservation_id: i32,
        connector_id: u32,
        id_tag: impl Into<String>,
        parent_id_tag: Option<String>,
        expiry_date: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            connector_id,
            id_tag: id_tag.into(),
            parent_id_tag,
            expiry_date,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }

    /// Whether a transaction started with `id_tag` on `connector_id`
    /// consumes this reservation.
    pub fn is_consumed_by(&self, connector_id: u32, id_tag: &str) -> bool {
        self.id_tag == id_tag && (self.connector_id == 0 || self.connector_id == connector_id)
    }
}
