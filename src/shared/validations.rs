//! Boundary validation helpers
//!
//! Domain string constraints checked before anything reaches a session:
//! id-tags are at most 20 characters, charge-point ids at most 32 path-safe
//! characters, timestamps are ISO-8601 UTC.

use chrono::{DateTime, Utc};

pub const MAX_ID_TAG_LEN: usize = 20;
pub const MAX_CHARGE_POINT_ID_LEN: usize = 32;

/// Validate an OCPP idTag (RFID / user token).
pub fn validate_id_tag(id_tag: &str) -> Result<(), String> {
    if id_tag.is_empty() {
        return Err("idTag must not be empty".to_string());
    }
    if id_tag.len() > MAX_ID_TAG_LEN {
        return Err(format!(
            "idTag '{}' exceeds {} characters",
            id_tag, MAX_ID_TAG_LEN
        ));
    }
    Ok(())
}

/// Validate a charge-point id as it appears in the WebSocket path.
pub fn validate_charge_point_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("charge point id must not be empty".to_string());
    }
    if id.len() > MAX_CHARGE_POINT_ID_LEN {
        return Err(format!(
            "charge point id exceeds {} characters",
            MAX_CHARGE_POINT_ID_LEN
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
    {
        return Err(format!("charge point id '{}' contains unsafe characters", id));
    }
    Ok(())
}

/// Parse an ISO-8601 timestamp into UTC.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid ISO-8601 timestamp '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_tag_bounds() {
        assert!(validate_id_tag("1234").is_ok());
        assert!(validate_id_tag(&"A".repeat(20)).is_ok());
        assert!(validate_id_tag(&"A".repeat(21)).is_err());
        assert!(validate_id_tag("").is_err());
    }

    #[test]
    fn charge_point_id_bounds() {
        assert!(validate_charge_point_id("CP-001").is_ok());
        assert!(validate_charge_point_id(&"C".repeat(32)).is_ok());
        assert!(validate_charge_point_id(&"C".repeat(33)).is_err());
        assert!(validate_charge_point_id("bad/id").is_err());
        assert!(validate_charge_point_id("").is_err());
    }

    #[test]
    fn iso8601_parsing() {
        assert!(parse_iso8601("2024-06-01T10:00:00Z").is_ok());
        assert!(parse_iso8601("2024-06-01T10:00:00+02:00").is_ok());
        assert!(parse_iso8601("yesterday").is_err());
    }
}
