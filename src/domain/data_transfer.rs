//! DataTransfer audit records and operator templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound DataTransfer frame recorded on the charger aggregate.
///
/// `compliant` is false when the charger sent `data` as a JSON object
/// instead of a string (accepted, but flagged for audit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTransferRecord {
    pub received_at: DateTime<Utc>,
    pub vendor_id: String,
    pub message_id: Option<String>,
    pub data: Option<Value>,
    pub compliant: bool,
}

impl DataTransferRecord {
    pub fn new(vendor_id: impl Into<String>, message_id: Option<String>, data: Option<Value>) -> Self {
        let compliant = !matches!(data, Some(Value::Object(_)));
        Self {
            received_at: Utc::now(),
            vendor_id: vendor_id.into(),
            message_id,
            data,
            compliant,
        }
    }
}

/// A reusable operator-defined DataTransfer payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTransferTemplate {
    pub id: i32,
    pub name: String,
    pub vendor_id: String,
    pub message_id: Option<String>,
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_data_is_compliant() {
        let rec = DataTransferRecord::new("CZ", Some("AutoStop".into()), Some(json!("1_7")));
        assert!(rec.compliant);
    }

    #[test]
    fn object_data_is_flagged() {
        let rec = DataTransferRecord::new(
            "MSIL",
            Some("AutoStop".into()),
            Some(json!({"transactionId": 1})),
        );
        assert!(!rec.compliant);
    }

    #[test]
    fn missing_data_is_compliant() {
        assert!(DataTransferRecord::new("V", None, None).compliant);
    }
}
