//! Per-charger vendor auto-stop settings
//!
//! A charger carries at most one vendor profile. After a successful
//! StartTransaction the post-transaction scheduler inspects these settings
//! and fires the corresponding deferred DataTransfer packets.

use serde::{Deserialize, Serialize};

/// Vendor-specific auto-stop configuration, tagged by vendor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vendor")]
pub enum VendorSettings {
    /// Jio_BP sends `Stop_Energy` / `Stop_Time` packets with
    /// `data = "<transactionId>_<value>"` under vendorId `Test_Server`.
    #[serde(rename = "Jio_BP")]
    JioBp {
        stop_energy_enabled: bool,
        stop_energy_value: i64,
        stop_time_enabled: bool,
        stop_time_value: i64,
    },
    /// MSIL expects the `data` field as a JSON *object* — a deliberate
    /// OCPP 1.6 violation kept for interop with that vendor's firmware.
    #[serde(rename = "MSIL")]
    Msil {
        auto_stop_enabled: bool,
        stop_energy_value: i64,
    },
    /// CZ takes the same logical payload as MSIL but serialized as a
    /// JSON string (compliant).
    #[serde(rename = "CZ")]
    Cz {
        auto_stop_enabled: bool,
        stop_energy_value: i64,
    },
}

impl VendorSettings {
    pub fn jio_bp(stop_energy: Option<i64>, stop_time: Option<i64>) -> Self {
        Self::JioBp {
            stop_energy_enabled: stop_energy.is_some(),
            stop_energy_value: stop_energy.unwrap_or(10),
            stop_time_enabled: stop_time.is_some(),
            stop_time_value: stop_time.unwrap_or(10),
        }
    }

    pub fn msil(stop_energy_value: i64) -> Self {
        Self::Msil {
            auto_stop_enabled: true,
            stop_energy_value,
        }
    }

    pub fn cz(stop_energy_value: i64) -> Self {
        Self::Cz {
            auto_stop_enabled: true,
            stop_energy_value,
        }
    }

    pub fn vendor_name(&self) -> &'static str {
        match self {
            Self::JioBp { .. } => "Jio_BP",
            Self::Msil { .. } => "MSIL",
            Self::Cz { .. } => "CZ",
        }
    }
}
