//! Charging-profile mirror
//!
//! The server keeps a copy of every profile a charge point accepted via
//! SetChargingProfile so operators can inspect installed limits without
//! round-tripping to the station.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A charging profile as accepted by the charge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChargingProfile {
    pub profile_id: i32,
    /// Connector the profile was installed on (0 = station-wide).
    pub connector_id: u32,
    pub stack_level: u32,
    /// ChargePointMaxProfile, TxDefaultProfile or TxProfile.
    pub purpose: String,
    /// Absolute, Recurring or Relative.
    pub kind: String,
    pub recurrency_kind: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    /// The full chargingSchedule object as sent on the wire.
    pub schedule: Value,
    pub installed_at: DateTime<Utc>,
}

impl StoredChargingProfile {
    /// Mirror a `rust_ocpp` v1.6 profile installed on `connector_id`.
    pub fn from_ocpp(
        connector_id: u32,
        profile: &rust_ocpp::v1_6::types::ChargingProfile,
    ) -> Self {
        Self {
            profile_id: profile.charging_profile_id,
            connector_id,
            stack_level: profile.stack_level,
            purpose: wire_enum_string(&profile.charging_profile_purpose),
            kind: wire_enum_string(&profile.charging_profile_kind),
            recurrency_kind: profile
                .recurrency_kind
                .as_ref()
                .map(wire_enum_string),
            valid_from: profile.valid_from,
            valid_to: profile.valid_to,
            schedule: serde_json::to_value(&profile.charging_schedule)
                .unwrap_or(Value::Null),
            installed_at: Utc::now(),
        }
    }

    /// Whether this profile matches a clear filter. All present criteria
    /// must match (conjunctive); an empty filter matches everything.
    pub fn matches(&self, criteria: &ClearChargingProfileCriteria) -> bool {
        if let Some(id) = criteria.profile_id {
            if self.profile_id != id {
                return false;
            }
        }
        if let Some(connector) = criteria.connector_id {
            if self.connector_id != connector {
                return false;
            }
        }
        if let Some(purpose) = &criteria.purpose {
            if &self.purpose != purpose {
                return false;
            }
        }
        if let Some(level) = criteria.stack_level {
            if self.stack_level != level {
                return false;
            }
        }
        true
    }
}

/// Filter for ClearChargingProfile, applied conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearChargingProfileCriteria {
    pub profile_id: Option<i32>,
    pub connector_id: Option<u32>,
    pub purpose: Option<String>,
    pub stack_level: Option<u32>,
}

impl ClearChargingProfileCriteria {
    pub fn is_empty(&self) -> bool {
        self.profile_id.is_none()
            && self.connector_id.is_none()
            && self.purpose.is_none()
            && self.stack_level.is_none()
    }
}

/// Serialize an enum to its wire (camelCase/PascalCase) string.
pub(crate) fn wire_enum_string<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}
