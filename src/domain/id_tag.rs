//! Id-tag table entries (authorization tokens)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored authorization status of an id-tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationState {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

impl AuthorizationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Blocked => "Blocked",
            Self::Expired => "Expired",
            Self::Invalid => "Invalid",
            Self::ConcurrentTx => "ConcurrentTx",
        }
    }

    /// Parse a status string; unknown values map to `Invalid`.
    pub fn parse(s: &str) -> Self {
        match s {
            "Accepted" => Self::Accepted,
            "Blocked" => Self::Blocked,
            "Expired" => Self::Expired,
            "ConcurrentTx" => Self::ConcurrentTx,
            _ => Self::Invalid,
        }
    }
}

impl std::fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the global id-tag table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTagEntry {
    pub id_tag: String,
    pub status: AuthorizationState,
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_id_tag: Option<String>,
}

impl IdTagEntry {
    pub fn accepted(id_tag: impl Into<String>) -> Self {
        Self {
            id_tag: id_tag.into(),
            status: AuthorizationState::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            AuthorizationState::Accepted,
            AuthorizationState::Blocked,
            AuthorizationState::Expired,
            AuthorizationState::Invalid,
            AuthorizationState::ConcurrentTx,
        ] {
            assert_eq!(AuthorizationState::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_maps_to_invalid() {
        assert_eq!(
            AuthorizationState::parse("Rejected"),
            AuthorizationState::Invalid
        );
    }
}
