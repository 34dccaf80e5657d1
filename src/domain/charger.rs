//! Charger aggregate
//!
//! One value per charge point, mutated only through the store façade.
//! Embeds the connector map, reservations, the charging-profile mirror,
//! vendor settings, the DataTransfer audit trail and the bounded event log.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::charging_profile::{ClearChargingProfileCriteria, StoredChargingProfile};
use super::data_transfer::DataTransferRecord;
use super::reservation::Reservation;
use super::vendor::VendorSettings;

/// Soft cap on the per-charger event log; oldest entries are discarded.
pub const LOG_CAP: usize = 5000;

/// One entry of the per-charger event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Per-connector state as last reported / implied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorEntry {
    pub status: String,
    pub transaction_id: Option<i32>,
    pub id_tag: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectorEntry {
    fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            transaction_id: None,
            id_tag: None,
            started_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Charger aggregate, keyed by `charge_point_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charger {
    pub charge_point_id: String,
    /// Last overall availability reported via StatusNotification.
    pub status: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    /// Watermark refreshed on every inbound frame, not just Heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Latest numeric meter reading (Wh).
    pub meter_value: f64,
    pub current_transaction: Option<i32>,
    /// Highest transaction id issued for this charger.
    #[serde(default)]
    pub last_transaction_id: i32,
    pub connectors: BTreeMap<u32, ConnectorEntry>,
    pub reservations: BTreeMap<i32, Reservation>,
    /// connector id → profile id → mirrored profile.
    pub charging_profiles: BTreeMap<u32, BTreeMap<i32, StoredChargingProfile>>,
    pub vendor_settings: Option<VendorSettings>,
    pub data_transfer_packets: Vec<DataTransferRecord>,
    pub firmware_status: Option<String>,
    pub diagnostics_status: Option<String>,
    pub logs: VecDeque<LogEntry>,
    pub logs_cleared_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl Charger {
    pub fn new(charge_point_id: impl Into<String>) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            status: "Available".to_string(),
            vendor: None,
            model: None,
            last_heartbeat: Utc::now(),
            meter_value: 0.0,
            current_transaction: None,
            last_transaction_id: 0,
            connectors: BTreeMap::new(),
            reservations: BTreeMap::new(),
            charging_profiles: BTreeMap::new(),
            vendor_settings: None,
            data_transfer_packets: Vec::new(),
            firmware_status: None,
            diagnostics_status: None,
            logs: VecDeque::new(),
            logs_cleared_at: None,
            registered_at: Utc::now(),
        }
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    // ── Event log ──────────────────────────────────────────

    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push_back(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
        while self.logs.len() > LOG_CAP {
            self.logs.pop_front();
        }
    }

    /// Entries strictly newer than the cleared-at watermark, oldest first.
    pub fn visible_logs(&self) -> Vec<LogEntry> {
        match self.logs_cleared_at {
            Some(cleared_at) => self
                .logs
                .iter()
                .filter(|e| e.timestamp > cleared_at)
                .cloned()
                .collect(),
            None => self.logs.iter().cloned().collect(),
        }
    }

    /// Hide all current entries without deleting them, so concurrent
    /// readers never observe a half-cleared log.
    pub fn clear_logs(&mut self) {
        self.logs_cleared_at = Some(Utc::now());
    }

    // ── Connectors & transactions ──────────────────────────

    pub fn update_connector_status(&mut self, connector_id: u32, status: &str) {
        let now = Utc::now();
        self.connectors
            .entry(connector_id)
            .and_modify(|c| {
                c.status = status.to_string();
                c.updated_at = now;
            })
            .or_insert_with(|| ConnectorEntry::with_status(status));
    }

    /// Issue the next transaction id: wall-clock seconds, bumped past the
    /// last issued id so two starts within one second stay unique.
    pub fn next_transaction_id(&mut self) -> i32 {
        let seconds = Utc::now().timestamp().clamp(1, i32::MAX as i64) as i32;
        let id = seconds.max(self.last_transaction_id.saturating_add(1));
        self.last_transaction_id = id;
        id
    }

    /// Record a started transaction on `connector_id` and consume a
    /// reservation held by the same id-tag, if any.
    pub fn begin_transaction(&mut self, connector_id: u32, transaction_id: i32, id_tag: &str) {
        let now = Utc::now();
        let entry = self
            .connectors
            .entry(connector_id)
            .or_insert_with(|| ConnectorEntry::with_status("Preparing"));
        entry.status = "Preparing".to_string();
        entry.transaction_id = Some(transaction_id);
        entry.id_tag = Some(id_tag.to_string());
        entry.started_at = Some(now);
        entry.updated_at = now;

        self.current_transaction = Some(transaction_id);

        let consumed: Vec<i32> = self
            .reservations
            .values()
            .filter(|r| r.is_consumed_by(connector_id, id_tag))
            .map(|r| r.reservation_id)
            .collect();
        for id in consumed {
            self.reservations.remove(&id);
        }
    }

    /// Clear the transaction if `transaction_id` matches the active one.
    /// Returns true when something was cleared; an unknown id is a no-op.
    pub fn end_transaction(&mut self, transaction_id: i32) -> bool {
        if self.current_transaction != Some(transaction_id) {
            return false;
        }
        self.current_transaction = None;
        let now = Utc::now();
        for entry in self.connectors.values_mut() {
            if entry.transaction_id == Some(transaction_id) {
                entry.transaction_id = None;
                entry.id_tag = None;
                entry.started_at = None;
                entry.status = "Finishing".to_string();
                entry.updated_at = now;
            }
        }
        true
    }

    /// Connector currently carrying the active transaction.
    pub fn active_transaction_connector(&self) -> Option<(u32, &ConnectorEntry)> {
        let tx = self.current_transaction?;
        self.connectors
            .iter()
            .find(|(_, c)| c.transaction_id == Some(tx))
            .map(|(id, c)| (*id, c))
    }

    // ── Reservations ───────────────────────────────────────

    pub fn add_reservation(&mut self, reservation: Reservation) {
        self.reservations
            .insert(reservation.reservation_id, reservation);
    }

    pub fn remove_reservation(&mut self, reservation_id: i32) -> bool {
        self.reservations.remove(&reservation_id).is_some()
    }

    /// Active (non-expired) reservations; expired entries are pruned.
    pub fn active_reservations(&mut self, now: DateTime<Utc>) -> Vec<Reservation> {
        self.reservations.retain(|_, r| !r.is_expired(now));
        self.reservations.values().cloned().collect()
    }

    // ── Charging profiles ──────────────────────────────────

    pub fn add_charging_profile(&mut self, profile: StoredChargingProfile) {
        self.charging_profiles
            .entry(profile.connector_id)
            .or_default()
            .insert(profile.profile_id, profile);
    }

    /// Remove every mirrored profile matching the criteria; returns the
    /// number removed. An empty criteria set clears all profiles.
    pub fn clear_charging_profiles(&mut self, criteria: &ClearChargingProfileCriteria) -> usize {
        let mut removed = 0;
        for profiles in self.charging_profiles.values_mut() {
            let before = profiles.len();
            profiles.retain(|_, p| !p.matches(criteria));
            removed += before - profiles.len();
        }
        self.charging_profiles.retain(|_, m| !m.is_empty());
        removed
    }

    // ── DataTransfer audit ─────────────────────────────────

    pub fn record_data_transfer(&mut self, record: DataTransferRecord) {
        self.data_transfer_packets.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn charger() -> Charger {
        Charger::new("CP001")
    }

    /// current_transaction is set iff a connector entry carries the same id.
    fn transaction_invariant(c: &Charger) -> bool {
        match c.current_transaction {
            Some(tx) => c
                .connectors
                .values()
                .any(|e| e.transaction_id == Some(tx)),
            None => c.connectors.values().all(|e| e.transaction_id.is_none()),
        }
    }

    #[test]
    fn begin_and_end_transaction_keep_invariant() {
        let mut c = charger();
        assert!(transaction_invariant(&c));

        let tx = c.next_transaction_id();
        c.begin_transaction(1, tx, "TAG-1");
        assert!(transaction_invariant(&c));
        assert_eq!(c.current_transaction, Some(tx));
        assert_eq!(c.connectors[&1].status, "Preparing");
        assert_eq!(c.connectors[&1].id_tag.as_deref(), Some("TAG-1"));

        assert!(c.end_transaction(tx));
        assert!(transaction_invariant(&c));
        assert_eq!(c.current_transaction, None);
        assert_eq!(c.connectors[&1].status, "Finishing");
        assert!(c.connectors[&1].id_tag.is_none());
    }

    #[test]
    fn end_transaction_with_wrong_id_clears_nothing() {
        let mut c = charger();
        let tx = c.next_transaction_id();
        c.begin_transaction(1, tx, "TAG-1");

        assert!(!c.end_transaction(tx + 999));
        assert_eq!(c.current_transaction, Some(tx));
        assert_eq!(c.connectors[&1].transaction_id, Some(tx));
    }

    #[test]
    fn transaction_ids_are_strictly_increasing_within_a_second() {
        let mut c = charger();
        let a = c.next_transaction_id();
        let b = c.next_transaction_id();
        let d = c.next_transaction_id();
        assert!(b > a);
        assert!(d > b);
    }

    #[test]
    fn start_consumes_matching_reservation() {
        let mut c = charger();
        c.add_reservation(Reservation::new(
            42,
            1,
            "TAG-1",
            None,
            Utc::now() + Duration::hours(2),
        ));
        c.add_reservation(Reservation::new(
            43,
            2,
            "TAG-2",
            None,
            Utc::now() + Duration::hours(2),
        ));

        let tx = c.next_transaction_id();
        c.begin_transaction(1, tx, "TAG-1");

        assert!(!c.reservations.contains_key(&42));
        assert!(c.reservations.contains_key(&43));
    }

    #[test]
    fn expired_reservations_are_pruned_on_read() {
        let mut c = charger();
        c.add_reservation(Reservation::new(
            1,
            1,
            "TAG-1",
            None,
            Utc::now() - Duration::minutes(1),
        ));
        c.add_reservation(Reservation::new(
            2,
            1,
            "TAG-2",
            None,
            Utc::now() + Duration::hours(1),
        ));

        let active = c.active_reservations(Utc::now());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].reservation_id, 2);
        assert_eq!(c.reservations.len(), 1);
    }

    #[test]
    fn log_cap_evicts_oldest() {
        let mut c = charger();
        for i in 0..(LOG_CAP + 10) {
            c.append_log(format!("entry {}", i));
        }
        assert_eq!(c.logs.len(), LOG_CAP);
        assert_eq!(c.logs.front().unwrap().message, "entry 10");
    }

    #[test]
    fn cleared_logs_stay_in_storage_but_are_hidden() {
        let mut c = charger();
        c.append_log("before");
        c.clear_logs();
        c.append_log("after");

        let visible = c.visible_logs();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "after");
        // Entries older than the watermark are retained, never returned.
        assert_eq!(c.logs.len(), 2);
    }

    #[test]
    fn clear_profiles_with_empty_filter_removes_all() {
        let mut c = charger();
        for (id, connector) in [(100, 1), (101, 1), (102, 2)] {
            c.add_charging_profile(StoredChargingProfile {
                profile_id: id,
                connector_id: connector,
                stack_level: 0,
                purpose: "TxProfile".to_string(),
                kind: "Absolute".to_string(),
                recurrency_kind: None,
                valid_from: None,
                valid_to: None,
                schedule: json!({}),
                installed_at: Utc::now(),
            });
        }

        let removed = c.clear_charging_profiles(&ClearChargingProfileCriteria::default());
        assert_eq!(removed, 3);
        assert!(c.charging_profiles.is_empty());
    }

    #[test]
    fn clear_profiles_applies_conjunctive_filter() {
        let mut c = charger();
        for (id, connector, purpose) in [
            (100, 1, "TxProfile"),
            (101, 1, "TxDefaultProfile"),
            (102, 2, "TxProfile"),
        ] {
            c.add_charging_profile(StoredChargingProfile {
                profile_id: id,
                connector_id: connector,
                stack_level: 0,
                purpose: purpose.to_string(),
                kind: "Absolute".to_string(),
                recurrency_kind: None,
                valid_from: None,
                valid_to: None,
                schedule: json!({}),
                installed_at: Utc::now(),
            });
        }

        let removed = c.clear_charging_profiles(&ClearChargingProfileCriteria {
            connector_id: Some(1),
            purpose: Some("TxProfile".to_string()),
            ..Default::default()
        });
        assert_eq!(removed, 1);
        assert!(c.charging_profiles[&1].contains_key(&101));
        assert!(c.charging_profiles[&2].contains_key(&102));
    }

    #[test]
    fn status_notification_overrides_implicit_connector_state() {
        let mut c = charger();
        let tx = c.next_transaction_id();
        c.begin_transaction(1, tx, "TAG-1");
        assert_eq!(c.connectors[&1].status, "Preparing");

        c.update_connector_status(1, "Charging");
        assert_eq!(c.connectors[&1].status, "Charging");
        // Transaction fields survive a status update.
        assert_eq!(c.connectors[&1].transaction_id, Some(tx));
    }
}
