//! Command dispatcher
//!
//! One typed method per CSMS-originated action. Beyond the wire exchange,
//! several commands mirror state into the charger aggregate: accepted
//! reservations, installed charging profiles, and the local authorization
//! list (version counter plus id-tag table).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::trigger_message::{
    TriggerMessageRequest, TriggerMessageResponse,
};
use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::messages::update_firmware::UpdateFirmwareRequest;
use rust_ocpp::v1_6::types::{
    AuthorizationData, AuthorizationStatus, AvailabilityType, ChargingProfile,
    ChargingProfilePurposeType, ChargingRateUnitType, IdTagInfo, MessageTrigger,
    ResetRequestStatus, UpdateType,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    AuthorizationState, ChargerStore, ClearChargingProfileCriteria, IdTagEntry, Reservation,
    StoredChargingProfile,
};
use crate::session::{Session, SharedSessionRegistry};
use crate::shared::validations::validate_id_tag;

use super::{
    Availability, CommandError, CompositeScheduleResult, ConfigurationKey, ConfigurationResult,
    DataTransferOutcome, LocalAuthEntry, LocalListUpdate, ResetKind, TriggerKind,
    DEFAULT_CALL_TIMEOUT,
};

use crate::application::handlers::wire_string;

fn record_command_latency(action: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("csms_command_latency_seconds", "action" => action).record(duration);
    metrics::counter!("csms_commands_total", "action" => action).increment(1);
}

/// Typed operator-facing command surface.
pub struct CommandDispatcher {
    registry: SharedSessionRegistry,
    store: Arc<dyn ChargerStore>,
    call_timeout: Duration,
}

pub type SharedCommandDispatcher = Arc<CommandDispatcher>;

impl CommandDispatcher {
    pub fn new(registry: SharedSessionRegistry, store: Arc<dyn ChargerStore>) -> Self {
        Self::with_timeout(registry, store, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(
        registry: SharedSessionRegistry,
        store: Arc<dyn ChargerStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            call_timeout,
        }
    }

    /// Resolve a live session or fail without emitting any frame.
    fn session(&self, charge_point_id: &str) -> Result<Arc<Session>, CommandError> {
        self.registry
            .get(charge_point_id)
            .ok_or_else(|| CommandError::NotConnected(charge_point_id.to_string()))
    }

    async fn send<Req, Resp>(
        &self,
        session: &Session,
        action: &str,
        request: &Req,
    ) -> Result<Resp, CommandError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| CommandError::InvalidRequest(format!("Serialization failed: {}", e)))?;
        let reply = session.call(action, payload, self.call_timeout).await?;
        serde_json::from_value(reply)
            .map_err(|e| CommandError::InvalidResponse(format!("{} reply: {}", action, e)))
    }

    async fn log(&self, charge_point_id: &str, message: String) {
        if let Err(e) = self.store.append_log(charge_point_id, message).await {
            warn!(charge_point_id, error = %e, "Could not append command log");
        }
    }

    // ─── RemoteStartTransaction ────────────────────────────────────────

    pub async fn remote_start(
        &self,
        charge_point_id: &str,
        id_tag: &str,
        connector_id: Option<u32>,
    ) -> Result<String, CommandError> {
        validate_id_tag(id_tag).map_err(CommandError::InvalidRequest)?;
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, id_tag, ?connector_id, "RemoteStartTransaction");

        let request = RemoteStartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            charging_profile: None,
        };
        let result: Result<RemoteStartTransactionResponse, CommandError> =
            self.send(&session, "RemoteStartTransaction", &request).await;
        record_command_latency("remote_start", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!(
                        "RemoteStartTransaction sent: id_tag={}, connector={:?}, status={}",
                        id_tag, connector_id, status
                    ),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ RemoteStartTransaction failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    // ─── RemoteStopTransaction ─────────────────────────────────────────

    pub async fn remote_stop(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, transaction_id, "RemoteStopTransaction");

        let request = RemoteStopTransactionRequest { transaction_id };
        let result: Result<RemoteStopTransactionResponse, CommandError> =
            self.send(&session, "RemoteStopTransaction", &request).await;
        record_command_latency("remote_stop", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!(
                        "RemoteStopTransaction sent: transaction_id={}, status={}",
                        transaction_id, status
                    ),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ RemoteStopTransaction failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    // ─── GetConfiguration ──────────────────────────────────────────────

    pub async fn get_configuration(
        &self,
        charge_point_id: &str,
        keys: Option<Vec<String>>,
    ) -> Result<ConfigurationResult, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, ?keys, "GetConfiguration");

        let request = GetConfigurationRequest { key: keys };
        let result: Result<GetConfigurationResponse, CommandError> =
            self.send(&session, "GetConfiguration", &request).await;
        record_command_latency("get_configuration", start);

        let response = result?;
        Ok(ConfigurationResult {
            configuration_key: response
                .configuration_key
                .unwrap_or_default()
                .into_iter()
                .map(|kv| ConfigurationKey {
                    key: kv.key,
                    readonly: kv.readonly,
                    value: kv.value,
                })
                .collect(),
            unknown_key: response.unknown_key.unwrap_or_default(),
        })
    }

    // ─── ChangeConfiguration ───────────────────────────────────────────

    pub async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: String,
        value: String,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, key = key.as_str(), "ChangeConfiguration");

        let request = ChangeConfigurationRequest {
            key: key.clone(),
            value: value.clone(),
        };
        let result: Result<ChangeConfigurationResponse, CommandError> =
            self.send(&session, "ChangeConfiguration", &request).await;
        record_command_latency("change_configuration", start);

        let response = result?;
        let status = wire_string(&response.status);
        self.log(
            charge_point_id,
            format!(
                "ChangeConfiguration sent: key={}, value={}, status={}",
                key, value, status
            ),
        )
        .await;
        Ok(status)
    }

    // ─── ClearCache ────────────────────────────────────────────────────

    pub async fn clear_cache(&self, charge_point_id: &str) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, "ClearCache");

        let result: Result<ClearCacheResponse, CommandError> =
            self.send(&session, "ClearCache", &ClearCacheRequest {}).await;
        record_command_latency("clear_cache", start);

        let response = result?;
        let status = wire_string(&response.status);
        self.log(charge_point_id, format!("ClearCache sent: status={}", status))
            .await;
        Ok(status)
    }

    // ─── Reset ─────────────────────────────────────────────────────────

    pub async fn reset(
        &self,
        charge_point_id: &str,
        kind: ResetKind,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, ?kind, "Reset");

        let request = ResetRequest {
            kind: match kind {
                ResetKind::Soft => ResetRequestStatus::Soft,
                ResetKind::Hard => ResetRequestStatus::Hard,
            },
        };
        self.log(
            charge_point_id,
            format!("Sending Reset request: type={:?}", kind),
        )
        .await;
        let result: Result<ResetResponse, CommandError> =
            self.send(&session, "Reset", &request).await;
        record_command_latency("reset", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(charge_point_id, format!("Reset response: status={}", status))
                    .await;
                Ok(status)
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ Reset failed: {}", e)).await;
                Err(e)
            }
        }
    }

    // ─── TriggerMessage ────────────────────────────────────────────────

    pub async fn trigger_message(
        &self,
        charge_point_id: &str,
        requested: TriggerKind,
        connector_id: Option<u32>,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, ?requested, ?connector_id, "TriggerMessage");

        let request = TriggerMessageRequest {
            requested_message: match requested {
                TriggerKind::BootNotification => MessageTrigger::BootNotification,
                TriggerKind::DiagnosticsStatusNotification => {
                    MessageTrigger::DiagnosticsStatusNotification
                }
                TriggerKind::FirmwareStatusNotification => {
                    MessageTrigger::FirmwareStatusNotification
                }
                TriggerKind::Heartbeat => MessageTrigger::Heartbeat,
                TriggerKind::MeterValues => MessageTrigger::MeterValues,
                TriggerKind::StatusNotification => MessageTrigger::StatusNotification,
            },
            connector_id,
        };
        self.log(
            charge_point_id,
            format!(
                "Sending TriggerMessage request: requested_message={:?}, connector={:?}",
                requested, connector_id
            ),
        )
        .await;
        let result: Result<TriggerMessageResponse, CommandError> =
            self.send(&session, "TriggerMessage", &request).await;
        record_command_latency("trigger_message", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!("TriggerMessage response: status={}", status),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ TriggerMessage failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    // ─── SendLocalList / local authorization list ──────────────────────

    /// Pushes the local authorization list. The global list version is
    /// incremented exactly once per invocation; on Accepted the entries are
    /// mirrored into the id-tag table.
    pub async fn send_local_list(
        &self,
        charge_point_id: &str,
        update: LocalListUpdate,
        entries: Vec<LocalAuthEntry>,
    ) -> Result<String, CommandError> {
        for entry in &entries {
            validate_id_tag(&entry.id_tag).map_err(CommandError::InvalidRequest)?;
        }
        let session = self.session(charge_point_id)?;
        let start = Instant::now();

        let list_version = self.store.next_local_list_version().await?;
        info!(charge_point_id, list_version, ?update, "SendLocalList");

        let request = SendLocalListRequest {
            list_version,
            update_type: match update {
                LocalListUpdate::Full => UpdateType::Full,
                LocalListUpdate::Differential => UpdateType::Differential,
            },
            local_authorization_list: Some(
                entries
                    .iter()
                    .map(|e| AuthorizationData {
                        id_tag: e.id_tag.clone(),
                        id_tag_info: Some(IdTagInfo {
                            status: match e.status.unwrap_or(AuthorizationState::Accepted) {
                                AuthorizationState::Accepted => AuthorizationStatus::Accepted,
                                AuthorizationState::Blocked => AuthorizationStatus::Blocked,
                                AuthorizationState::Expired => AuthorizationStatus::Expired,
                                AuthorizationState::Invalid => AuthorizationStatus::Invalid,
                                AuthorizationState::ConcurrentTx => {
                                    AuthorizationStatus::ConcurrentTx
                                }
                            },
                            expiry_date: e.expiry_date,
                            parent_id_tag: e.parent_id_tag.clone(),
                        }),
                    })
                    .collect(),
            ),
        };
        let result: Result<SendLocalListResponse, CommandError> =
            self.send(&session, "SendLocalList", &request).await;
        record_command_latency("send_local_list", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                if status == "Accepted" {
                    for entry in &entries {
                        self.store
                            .upsert_id_tag(IdTagEntry {
                                id_tag: entry.id_tag.clone(),
                                status: entry.status.unwrap_or(AuthorizationState::Accepted),
                                expiry_date: entry.expiry_date,
                                parent_id_tag: entry.parent_id_tag.clone(),
                            })
                            .await?;
                    }
                }
                self.log(
                    charge_point_id,
                    format!(
                        "SendLocalList sent: version={}, entries={}, status={}",
                        list_version,
                        entries.len(),
                        status
                    ),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ SendLocalList failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Clears the charger's local list by sending an empty Full update with
    /// version 0. OCPP 1.6 defines a distinct call for this; the empty-list
    /// form is an interop choice kept from the field. The global version
    /// counter is not consumed.
    pub async fn clear_local_list(&self, charge_point_id: &str) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, "ClearLocalList (SendLocalList version 0)");

        let request = SendLocalListRequest {
            list_version: 0,
            update_type: UpdateType::Full,
            local_authorization_list: Some(Vec::new()),
        };
        let result: Result<SendLocalListResponse, CommandError> =
            self.send(&session, "SendLocalList", &request).await;
        record_command_latency("clear_local_list", start);

        let response = result?;
        let status = wire_string(&response.status);
        self.log(
            charge_point_id,
            format!("Local list cleared (empty Full update): status={}", status),
        )
        .await;
        Ok(status)
    }

    pub async fn get_local_list_version(
        &self,
        charge_point_id: &str,
    ) -> Result<i32, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, "GetLocalListVersion");

        let result: Result<GetLocalListVersionResponse, CommandError> = self
            .send(&session, "GetLocalListVersion", &GetLocalListVersionRequest {})
            .await;
        record_command_latency("get_local_list_version", start);

        Ok(result?.list_version)
    }

    // ─── DataTransfer ──────────────────────────────────────────────────

    pub async fn data_transfer(
        &self,
        charge_point_id: &str,
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    ) -> Result<DataTransferOutcome, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(
            charge_point_id,
            vendor_id = vendor_id.as_str(),
            ?message_id,
            "DataTransfer"
        );

        let request = DataTransferRequest {
            vendor_string: vendor_id.clone(),
            message_id: message_id.clone(),
            data: data.clone(),
        };
        let result: Result<DataTransferResponse, CommandError> =
            self.send(&session, "DataTransfer", &request).await;
        record_command_latency("data_transfer", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!(
                        "DataTransfer sent: vendorId={}, messageId={:?}, status={}",
                        vendor_id, message_id, status
                    ),
                )
                .await;
                Ok(DataTransferOutcome {
                    status,
                    data: response.data,
                })
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ DataTransfer failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// DataTransfer fed from a stored template.
    pub async fn data_transfer_from_template(
        &self,
        charge_point_id: &str,
        template_id: i32,
    ) -> Result<DataTransferOutcome, CommandError> {
        let template = self
            .store
            .get_data_transfer_template(template_id)
            .await?
            .ok_or_else(|| {
                CommandError::InvalidRequest(format!(
                    "Data transfer template {} not found",
                    template_id
                ))
            })?;
        self.data_transfer(
            charge_point_id,
            template.vendor_id,
            template.message_id,
            template.data,
        )
        .await
    }

    // ─── ChangeAvailability ────────────────────────────────────────────

    pub async fn change_availability(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        availability: Availability,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, connector_id, ?availability, "ChangeAvailability");

        let request = ChangeAvailabilityRequest {
            connector_id,
            kind: match availability {
                Availability::Operative => AvailabilityType::Operative,
                Availability::Inoperative => AvailabilityType::Inoperative,
            },
        };
        self.log(
            charge_point_id,
            format!(
                "Sending ChangeAvailability request: connector_id={}, type={:?}",
                connector_id, availability
            ),
        )
        .await;
        let result: Result<ChangeAvailabilityResponse, CommandError> =
            self.send(&session, "ChangeAvailability", &request).await;
        record_command_latency("change_availability", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!("ChangeAvailability response: status={}", status),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ ChangeAvailability failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    // ─── ReserveNow / CancelReservation ────────────────────────────────

    pub async fn reserve_now(
        &self,
        charge_point_id: &str,
        reservation_id: i32,
        connector_id: u32,
        id_tag: &str,
        parent_id_tag: Option<&str>,
        expiry_date: DateTime<Utc>,
    ) -> Result<String, CommandError> {
        validate_id_tag(id_tag).map_err(CommandError::InvalidRequest)?;
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, reservation_id, connector_id, id_tag, "ReserveNow");

        let request = ReserveNowRequest {
            connector_id,
            expiry_date,
            id_tag: id_tag.to_string(),
            parent_id_tag: parent_id_tag.map(str::to_string),
            reservation_id,
        };
        self.log(
            charge_point_id,
            format!(
                "Sending ReserveNow request: connector_id={}, reservation_id={}, id_tag={}, expiry={}",
                connector_id, reservation_id, id_tag, expiry_date
            ),
        )
        .await;
        let result: Result<ReserveNowResponse, CommandError> =
            self.send(&session, "ReserveNow", &request).await;
        record_command_latency("reserve_now", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                if status == "Accepted" {
                    let reservation = Reservation::new(
                        reservation_id,
                        connector_id,
                        id_tag,
                        parent_id_tag.map(str::to_string),
                        expiry_date,
                    );
                    self.store
                        .apply_charger_mutation(
                            charge_point_id,
                            Box::new(move |c| c.add_reservation(reservation)),
                        )
                        .await?;
                    self.log(
                        charge_point_id,
                        format!("✅ Reservation {} created", reservation_id),
                    )
                    .await;
                } else {
                    self.log(
                        charge_point_id,
                        format!("ReserveNow response: status={}", status),
                    )
                    .await;
                }
                Ok(status)
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ ReserveNow failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn cancel_reservation(
        &self,
        charge_point_id: &str,
        reservation_id: i32,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, reservation_id, "CancelReservation");

        let request = CancelReservationRequest { reservation_id };
        let result: Result<CancelReservationResponse, CommandError> =
            self.send(&session, "CancelReservation", &request).await;
        record_command_latency("cancel_reservation", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                if status == "Accepted" {
                    self.store
                        .apply_charger_mutation(
                            charge_point_id,
                            Box::new(move |c| {
                                c.remove_reservation(reservation_id);
                            }),
                        )
                        .await?;
                    self.log(
                        charge_point_id,
                        format!("✅ Reservation {} cancelled", reservation_id),
                    )
                    .await;
                } else {
                    self.log(
                        charge_point_id,
                        format!("CancelReservation response: status={}", status),
                    )
                    .await;
                }
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ CancelReservation failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    // ─── Smart charging ────────────────────────────────────────────────

    /// Install a charging profile on `connector_id` (0 = station-wide).
    /// `profile_json` is the full OCPP ChargingProfile object; on Accepted
    /// it is mirrored into the charger aggregate.
    pub async fn set_charging_profile(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        profile_json: Value,
    ) -> Result<String, CommandError> {
        let profile: ChargingProfile = serde_json::from_value(profile_json).map_err(|e| {
            CommandError::InvalidRequest(format!("Invalid ChargingProfile JSON: {}", e))
        })?;
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(
            charge_point_id,
            connector_id,
            profile_id = profile.charging_profile_id,
            "SetChargingProfile"
        );

        let request = SetChargingProfileRequest {
            connector_id: connector_id as i32,
            cs_charging_profiles: profile.clone(),
        };
        let result: Result<SetChargingProfileResponse, CommandError> =
            self.send(&session, "SetChargingProfile", &request).await;
        record_command_latency("set_charging_profile", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                if status == "Accepted" {
                    let stored = StoredChargingProfile::from_ocpp(connector_id, &profile);
                    self.store
                        .apply_charger_mutation(
                            charge_point_id,
                            Box::new(move |c| c.add_charging_profile(stored)),
                        )
                        .await?;
                    self.log(
                        charge_point_id,
                        format!(
                            "✅ Charging profile {} set on connector {}",
                            profile.charging_profile_id, connector_id
                        ),
                    )
                    .await;
                } else {
                    self.log(
                        charge_point_id,
                        format!("SetChargingProfile response: status={}", status),
                    )
                    .await;
                }
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ SetChargingProfile failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Clear charging profiles matching the criteria (conjunctive; an empty
    /// criteria set clears all). The mirror follows on Accepted.
    pub async fn clear_charging_profile(
        &self,
        charge_point_id: &str,
        criteria: ClearChargingProfileCriteria,
    ) -> Result<String, CommandError> {
        let purpose = criteria
            .purpose
            .as_deref()
            .map(parse_profile_purpose)
            .transpose()?;
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, ?criteria, "ClearChargingProfile");

        let request = ClearChargingProfileRequest {
            id: criteria.profile_id,
            connector_id: criteria.connector_id.map(|c| c as i32),
            charging_profile_purpose: purpose,
            stack_level: criteria.stack_level.map(|s| s as i32),
        };
        let result: Result<ClearChargingProfileResponse, CommandError> =
            self.send(&session, "ClearChargingProfile", &request).await;
        record_command_latency("clear_charging_profile", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                if status == "Accepted" {
                    let criteria_for_mutation = criteria.clone();
                    self.store
                        .apply_charger_mutation(
                            charge_point_id,
                            Box::new(move |c| {
                                c.clear_charging_profiles(&criteria_for_mutation);
                            }),
                        )
                        .await?;
                    self.log(
                        charge_point_id,
                        "✅ Charging profiles cleared".to_string(),
                    )
                    .await;
                } else {
                    self.log(
                        charge_point_id,
                        format!("ClearChargingProfile response: status={}", status),
                    )
                    .await;
                }
                Ok(status)
            }
            Err(e) => {
                self.log(
                    charge_point_id,
                    format!("❌ ClearChargingProfile failed: {}", e),
                )
                .await;
                Err(e)
            }
        }
    }

    pub async fn get_composite_schedule(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        duration_secs: i32,
        charging_rate_unit: Option<&str>,
    ) -> Result<CompositeScheduleResult, CommandError> {
        let rate_unit = charging_rate_unit
            .map(|u| match u.to_ascii_uppercase().as_str() {
                "A" => Ok(ChargingRateUnitType::A),
                "W" => Ok(ChargingRateUnitType::W),
                other => Err(CommandError::InvalidRequest(format!(
                    "chargingRateUnit must be 'W' or 'A', got '{}'",
                    other
                ))),
            })
            .transpose()?;
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, connector_id, duration_secs, "GetCompositeSchedule");

        let request = GetCompositeScheduleRequest {
            connector_id: connector_id as i32,
            duration: duration_secs,
            charging_rate_unit: rate_unit,
        };
        let result: Result<GetCompositeScheduleResponse, CommandError> =
            self.send(&session, "GetCompositeSchedule", &request).await;
        record_command_latency("get_composite_schedule", start);

        let response = result?;
        Ok(CompositeScheduleResult {
            status: wire_string(&response.status),
            connector_id: response.connector_id,
            schedule_start: response.schedule_start,
            schedule: response
                .charging_schedule
                .map(|s| serde_json::to_value(&s).unwrap_or_default()),
        })
    }

    // ─── Firmware & diagnostics ────────────────────────────────────────

    /// v1.6 UpdateFirmware has an empty response; a successful exchange
    /// counts as accepted.
    pub async fn update_firmware(
        &self,
        charge_point_id: &str,
        location: &str,
        retrieve_date: DateTime<Utc>,
        retries: Option<i32>,
        retry_interval: Option<i32>,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, location, %retrieve_date, "UpdateFirmware");

        let request = UpdateFirmwareRequest {
            location: location.to_string(),
            retries,
            retrieve_date,
            retry_interval,
        };
        self.log(
            charge_point_id,
            format!(
                "Sending UpdateFirmware request: location={}, retrieve_date={}",
                location, retrieve_date
            ),
        )
        .await;
        let result: Result<Value, CommandError> =
            self.send(&session, "UpdateFirmware", &request).await;
        record_command_latency("update_firmware", start);

        result?;
        self.log(charge_point_id, "UpdateFirmware acknowledged".to_string())
            .await;
        Ok("Accepted".to_string())
    }

    /// Returns the file name the charger will upload diagnostics under.
    pub async fn get_diagnostics(
        &self,
        charge_point_id: &str,
        location: &str,
        retries: Option<i32>,
        retry_interval: Option<i32>,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Result<Option<String>, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, location, "GetDiagnostics");

        let request = GetDiagnosticsRequest {
            location: location.to_string(),
            retries,
            retry_interval,
            start_time,
            stop_time,
        };
        self.log(
            charge_point_id,
            format!("Sending GetDiagnostics request: location={}", location),
        )
        .await;
        let result: Result<GetDiagnosticsResponse, CommandError> =
            self.send(&session, "GetDiagnostics", &request).await;
        record_command_latency("get_diagnostics", start);

        let response = result?;
        self.log(
            charge_point_id,
            format!("GetDiagnostics response: file_name={:?}", response.file_name),
        )
        .await;
        Ok(response.file_name)
    }

    // ─── UnlockConnector ───────────────────────────────────────────────

    pub async fn unlock_connector(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<String, CommandError> {
        let session = self.session(charge_point_id)?;
        let start = Instant::now();
        info!(charge_point_id, connector_id, "UnlockConnector");

        let request = UnlockConnectorRequest { connector_id };
        let result: Result<UnlockConnectorResponse, CommandError> =
            self.send(&session, "UnlockConnector", &request).await;
        record_command_latency("unlock_connector", start);

        match result {
            Ok(response) => {
                let status = wire_string(&response.status);
                self.log(
                    charge_point_id,
                    format!("UnlockConnector response: status={}", status),
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.log(charge_point_id, format!("❌ UnlockConnector failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    // ─── Raw bypass ────────────────────────────────────────────────────

    /// Transmit an operator-supplied string on the wire. The only check is
    /// a JSON-parseability warning; no waiter is installed, so any reply
    /// the charger sends is dropped by the correlation layer. A Call frame
    /// whose unique-id slot is empty or null gets a generated id stamped
    /// before transmission; everything else goes out verbatim.
    pub async fn send_raw(
        &self,
        charge_point_id: &str,
        raw_message: &str,
    ) -> Result<(), CommandError> {
        let session = self.session(charge_point_id)?;

        let outgoing = match serde_json::from_str::<Value>(raw_message) {
            Ok(mut frame) => {
                if let Some(stamped) = stamp_missing_unique_id(&mut frame) {
                    self.log(
                        charge_point_id,
                        format!("Raw Call frame had no uniqueId, stamped {}", stamped),
                    )
                    .await;
                    frame.to_string()
                } else {
                    raw_message.to_string()
                }
            }
            Err(_) => {
                warn!(charge_point_id, "Raw message is not valid JSON, sending anyway");
                self.log(
                    charge_point_id,
                    "⚠️ Raw message is not valid JSON".to_string(),
                )
                .await;
                raw_message.to_string()
            }
        };

        session
            .send_frame(outgoing.clone())
            .map_err(CommandError::from)?;
        self.log(
            charge_point_id,
            format!("📤 Raw frame sent (no validation): {}", outgoing),
        )
        .await;
        Ok(())
    }

    // ─── Force disconnect ──────────────────────────────────────────────

    /// Operator-driven close: cancels the session's pending calls and
    /// removes it from the registry.
    pub async fn disconnect(&self, charge_point_id: &str) -> Result<(), CommandError> {
        let session = self.session(charge_point_id)?;
        session.close();
        self.registry.unbind(&session);
        self.log(charge_point_id, "Connection closed by operator".to_string())
            .await;
        Ok(())
    }
}

/// Fill an empty or null unique-id slot on a raw Call frame with a fresh
/// uuid. Returns the stamped id, or `None` when the frame was left alone.
fn stamp_missing_unique_id(frame: &mut Value) -> Option<String> {
    let arr = frame.as_array_mut()?;
    // Only Call frames ([2, uid, action, payload]) carry a client-chosen id.
    if arr.first().and_then(Value::as_u64) != Some(2) {
        return None;
    }
    let slot = arr.get_mut(1)?;
    if slot.is_null() || slot.as_str() == Some("") {
        let stamped = Uuid::new_v4().to_string();
        *slot = Value::String(stamped.clone());
        return Some(stamped);
    }
    None
}

fn parse_profile_purpose(purpose: &str) -> Result<ChargingProfilePurposeType, CommandError> {
    match purpose {
        "ChargePointMaxProfile" => Ok(ChargingProfilePurposeType::ChargePointMaxProfile),
        "TxDefaultProfile" => Ok(ChargingProfilePurposeType::TxDefaultProfile),
        "TxProfile" => Ok(ChargingProfilePurposeType::TxProfile),
        other => Err(CommandError::InvalidRequest(format!(
            "Unknown charging profile purpose '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStore;
    use crate::session::SessionRegistry;
    use crate::shared::ocpp_frame::OcppFrame;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        dispatcher: CommandDispatcher,
        store: Arc<InMemoryStore>,
        registry: SharedSessionRegistry,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let registry = SessionRegistry::shared();
        let dispatcher = CommandDispatcher::with_timeout(
            registry.clone(),
            store.clone(),
            Duration::from_secs(5),
        );
        Harness {
            dispatcher,
            store,
            registry,
        }
    }

    /// Bind a session whose "charger" answers every Call with `reply`.
    fn connect_charger(
        harness: &Harness,
        charge_point_id: &str,
        reply: impl Fn(&str, &Value) -> Value + Send + 'static,
    ) -> Arc<Session> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = Arc::new(Session::new(charge_point_id, tx));
        harness.registry.bind(session.clone());

        let responder = session.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Ok(OcppFrame::Call {
                    unique_id,
                    action,
                    payload,
                }) = OcppFrame::decode(&frame)
                {
                    responder.complete_call(&unique_id, reply(&action, &payload));
                }
            }
        });
        session
    }

    #[tokio::test]
    async fn command_on_disconnected_charger_fails_without_frames() {
        let h = harness();
        let err = h
            .dispatcher
            .remote_start("CX", "1234", Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotConnected(_)));
    }

    #[tokio::test]
    async fn remote_start_happy_path() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |action, payload| {
            assert_eq!(action, "RemoteStartTransaction");
            assert_eq!(payload["idTag"], "1234");
            assert_eq!(payload["connectorId"], 1);
            json!({"status": "Accepted"})
        });

        let status = h
            .dispatcher
            .remote_start("C1", "1234", Some(1))
            .await
            .unwrap();
        assert_eq!(status, "Accepted");
    }

    #[tokio::test]
    async fn remote_start_rejects_oversized_id_tag() {
        let h = harness();
        let err = h
            .dispatcher
            .remote_start("C1", &"X".repeat(21), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn reserve_then_cancel_mirrors_reservations() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, _| json!({"status": "Accepted"}));

        let expiry = Utc::now() + ChronoDuration::hours(2);
        let status = h
            .dispatcher
            .reserve_now("C1", 42, 1, "U", None, expiry)
            .await
            .unwrap();
        assert_eq!(status, "Accepted");

        let mut charger = h.store.get_charger("C1").await.unwrap().unwrap();
        assert_eq!(charger.active_reservations(Utc::now()).len(), 1);

        let status = h.dispatcher.cancel_reservation("C1", 42).await.unwrap();
        assert_eq!(status, "Accepted");

        let charger = h.store.get_charger("C1").await.unwrap().unwrap();
        assert!(charger.reservations.is_empty());
    }

    #[tokio::test]
    async fn rejected_reservation_is_not_mirrored() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, _| json!({"status": "Occupied"}));

        let status = h
            .dispatcher
            .reserve_now("C1", 9, 1, "U", None, Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(status, "Occupied");

        let charger = h.store.get_charger("C1").await.unwrap().unwrap();
        assert!(charger.reservations.is_empty());
    }

    #[tokio::test]
    async fn send_local_list_increments_version_and_mirrors_tags() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |action, payload| {
            assert_eq!(action, "SendLocalList");
            assert_eq!(payload["listVersion"], 1);
            json!({"status": "Accepted"})
        });

        let entries = vec![LocalAuthEntry {
            id_tag: "TAG-1".to_string(),
            status: None,
            expiry_date: None,
            parent_id_tag: None,
        }];
        let status = h
            .dispatcher
            .send_local_list("C1", LocalListUpdate::Full, entries)
            .await
            .unwrap();
        assert_eq!(status, "Accepted");

        assert_eq!(h.store.local_list_version().await.unwrap(), 1);
        let tag = h.store.get_id_tag("TAG-1").await.unwrap().unwrap();
        assert_eq!(tag.status, AuthorizationState::Accepted);
    }

    #[tokio::test]
    async fn clear_local_list_sends_version_zero_and_keeps_counter() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, payload| {
            assert_eq!(payload["listVersion"], 0);
            assert_eq!(payload["updateType"], "Full");
            assert_eq!(payload["localAuthorizationList"], json!([]));
            json!({"status": "Accepted"})
        });

        h.dispatcher.clear_local_list("C1").await.unwrap();
        assert_eq!(h.store.local_list_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_then_clear_charging_profile_keeps_mirror_in_sync() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, _| json!({"status": "Accepted"}));

        let profile = json!({
            "chargingProfileId": 100,
            "stackLevel": 0,
            "chargingProfilePurpose": "TxProfile",
            "chargingProfileKind": "Absolute",
            "chargingSchedule": {
                "chargingRateUnit": "W",
                "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 11000.0}]
            }
        });
        let status = h
            .dispatcher
            .set_charging_profile("C1", 1, profile)
            .await
            .unwrap();
        assert_eq!(status, "Accepted");

        let charger = h.store.get_charger("C1").await.unwrap().unwrap();
        assert!(charger.charging_profiles[&1].contains_key(&100));

        let status = h
            .dispatcher
            .clear_charging_profile("C1", ClearChargingProfileCriteria::default())
            .await
            .unwrap();
        assert_eq!(status, "Accepted");

        let charger = h.store.get_charger("C1").await.unwrap().unwrap();
        assert!(charger.charging_profiles.is_empty());
    }

    #[tokio::test]
    async fn invalid_profile_json_is_rejected_at_boundary() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, _| json!({"status": "Accepted"}));

        let err = h
            .dispatcher
            .set_charging_profile("C1", 1, json!({"nonsense": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn call_error_reply_surfaces_as_command_error() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = Arc::new(Session::new("C1", tx));
        h.registry.bind(session.clone());

        let responder = session.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Ok(OcppFrame::Call { unique_id, .. }) = OcppFrame::decode(&frame) {
                    responder.fail_call(&unique_id, "NotSupported", "nope");
                }
            }
        });

        let err = h.dispatcher.clear_cache("C1").await.unwrap_err();
        match err {
            CommandError::CallError { code, .. } => assert_eq!(code, "NotSupported"),
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_configuration_collects_keys() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        connect_charger(&h, "C1", |_, _| {
            json!({
                "configurationKey": [
                    {"key": "HeartbeatInterval", "readonly": false, "value": "300"}
                ],
                "unknownKey": ["Bogus"]
            })
        });

        let result = h
            .dispatcher
            .get_configuration("C1", Some(vec!["HeartbeatInterval".into(), "Bogus".into()]))
            .await
            .unwrap();
        assert_eq!(result.configuration_key.len(), 1);
        assert_eq!(result.configuration_key[0].key, "HeartbeatInterval");
        assert_eq!(result.unknown_key, vec!["Bogus"]);
    }

    #[tokio::test]
    async fn send_raw_installs_no_waiter() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = Arc::new(Session::new("C1", tx));
        h.registry.bind(session.clone());

        h.dispatcher
            .send_raw("C1", r#"[2,"raw-1","Heartbeat",{}]"#)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"[2,"raw-1","Heartbeat",{}]"#);
        assert_eq!(session.pending_calls(), 0);
    }

    #[tokio::test]
    async fn send_raw_stamps_missing_unique_id() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = Arc::new(Session::new("C1", tx));
        h.registry.bind(session.clone());

        h.dispatcher
            .send_raw("C1", r#"[2,null,"Heartbeat",{}]"#)
            .await
            .unwrap();

        let sent = rx.recv().await.unwrap();
        match OcppFrame::decode(&sent).unwrap() {
            OcppFrame::Call {
                unique_id, action, ..
            } => {
                assert_eq!(action, "Heartbeat");
                // uuid v4 text form, within the OCPP-J 36-char limit.
                assert_eq!(unique_id.len(), 36);
            }
            other => panic!("expected Call, got {:?}", other),
        }
        // Still fire-and-forget: no reply correlation is attempted.
        assert_eq!(session.pending_calls(), 0);
    }

    #[test]
    fn stamp_leaves_complete_frames_and_replies_alone() {
        let mut with_id = serde_json::from_str::<Value>(r#"[2,"u-1","Heartbeat",{}]"#).unwrap();
        assert!(stamp_missing_unique_id(&mut with_id).is_none());

        let mut reply = serde_json::from_str::<Value>(r#"[3,null,{}]"#).unwrap();
        assert!(stamp_missing_unique_id(&mut reply).is_none());

        let mut empty = serde_json::from_str::<Value>(r#"[2,"","Reset",{}]"#).unwrap();
        let stamped = stamp_missing_unique_id(&mut empty).unwrap();
        assert_eq!(empty[1].as_str().unwrap(), stamped);
    }

    #[tokio::test]
    async fn disconnect_closes_and_unbinds() {
        let h = harness();
        h.store.upsert_charger("C1").await.unwrap();
        let session = connect_charger(&h, "C1", |_, _| json!({}));

        h.dispatcher.disconnect("C1").await.unwrap();
        assert!(session.is_closed());
        assert!(!h.registry.is_connected("C1"));

        let err = h.dispatcher.clear_cache("C1").await.unwrap_err();
        assert!(matches!(err, CommandError::NotConnected(_)));
    }
}
