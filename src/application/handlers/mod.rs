//! Inbound OCPP 1.6 message handling
//!
//! The router decodes raw frames from the receive loop, dispatches Calls to
//! the per-action handlers, writes the CallResult (or a CallError for
//! rejected/unknown actions) and feeds CallResult / CallError frames back
//! into the session's pending-call table.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::application::scheduler::PostTransactionScheduler;
use crate::domain::ChargerStore;
use crate::session::Session;
use crate::shared::ocpp_frame::{CallErrorCode, OcppFrame};

mod authorize;
mod boot_notification;
mod data_transfer;
mod diagnostics_status_notification;
mod firmware_status_notification;
mod heartbeat;
mod meter_values;
mod start_transaction;
mod status_notification;
mod stop_transaction;

use authorize::handle_authorize;
use boot_notification::handle_boot_notification;
use data_transfer::handle_data_transfer;
use diagnostics_status_notification::handle_diagnostics_status_notification;
use firmware_status_notification::handle_firmware_status_notification;
use heartbeat::handle_heartbeat;
use meter_values::handle_meter_values;
use start_transaction::handle_start_transaction;
use status_notification::handle_status_notification;
use stop_transaction::handle_stop_transaction;

/// A handler's reply payload plus an optional action to run after the
/// CallResult has been queued on the wire.
pub(crate) struct HandlerReply {
    pub payload: Value,
    pub follow_up: Option<FollowUp>,
}

impl HandlerReply {
    pub fn of(payload: Value) -> Self {
        Self {
            payload,
            follow_up: None,
        }
    }
}

/// Deferred work that must not run before the reply is on the wire.
pub(crate) enum FollowUp {
    PostTransaction { transaction_id: i32 },
}

/// A rejected Call, mapped to a CallError frame. Store failures convert
/// via the shared taxonomy, so handlers bubble them up with `?`.
pub(crate) use crate::shared::errors::CallRejection;

pub(crate) type HandlerResult = Result<HandlerReply, CallRejection>;

/// Parse a Call payload into its typed request; missing or ill-typed
/// fields become a FormationViolation.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    action: &str,
    payload: &Value,
) -> Result<T, CallRejection> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        CallRejection::new(
            CallErrorCode::FormationViolation,
            format!("Invalid {} payload: {}", action, e),
        )
    })
}

/// Serialize a typed response; these structs serialize infallibly.
pub(crate) fn to_payload<T: Serialize>(response: &T) -> Value {
    serde_json::to_value(response).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// Serialize an enum to its exact wire string (e.g. `SuspendedEVSE`).
pub(crate) use crate::domain::charging_profile::wire_enum_string as wire_string;

/// Routes inbound frames for all sessions.
pub struct OcppRouter {
    pub(crate) store: Arc<dyn ChargerStore>,
    scheduler: Arc<PostTransactionScheduler>,
    pub(crate) boot_interval_secs: u32,
}

impl OcppRouter {
    pub fn new(
        store: Arc<dyn ChargerStore>,
        scheduler: Arc<PostTransactionScheduler>,
        boot_interval_secs: u32,
    ) -> Self {
        Self {
            store,
            scheduler,
            boot_interval_secs,
        }
    }

    /// Handle one raw inbound frame. Called sequentially per session from
    /// the receive loop, so a handler's side effects are visible to the
    /// next frame on the same socket.
    pub async fn process(&self, session: &Arc<Session>, raw: &str) {
        let charge_point_id = session.charge_point_id().to_string();

        let frame = match OcppFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    charge_point_id = charge_point_id.as_str(),
                    error = %e,
                    raw,
                    "Undecodable frame"
                );
                match OcppFrame::salvage_unique_id(raw) {
                    Some(unique_id) => {
                        let reply = OcppFrame::call_error(
                            unique_id,
                            CallErrorCode::FormationViolation,
                            e.to_string(),
                        );
                        let _ = session.send_frame(reply.encode());
                    }
                    // No uid to answer on: the stream is beyond repair.
                    None => session.close(),
                }
                return;
            }
        };

        session.touch();
        self.touch_charger(&charge_point_id).await;

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                self.handle_call(session, &charge_point_id, &unique_id, &action, payload)
                    .await;
            }
            OcppFrame::CallResult { unique_id, payload } => {
                session.complete_call(&unique_id, payload);
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                session.fail_call(&unique_id, &error_code, &error_description);
            }
        }
    }

    async fn handle_call(
        &self,
        session: &Arc<Session>,
        charge_point_id: &str,
        unique_id: &str,
        action: &str,
        payload: Value,
    ) {
        let outcome = self.dispatch(charge_point_id, action, &payload).await;

        match outcome {
            Ok(HandlerReply { payload, follow_up }) => {
                let reply = OcppFrame::CallResult {
                    unique_id: unique_id.to_string(),
                    payload,
                };
                if session.send_frame(reply.encode()).is_err() {
                    error!(
                        charge_point_id,
                        action, "Failed to queue CallResult, session gone"
                    );
                    return;
                }
                // Deferred work runs strictly after the reply was queued on
                // the single-writer channel, so it cannot overtake it.
                if let Some(FollowUp::PostTransaction { transaction_id }) = follow_up {
                    self.scheduler.arm(session.clone(), transaction_id);
                }
            }
            Err(rejection) => {
                warn!(
                    charge_point_id,
                    action,
                    code = rejection.code.as_str(),
                    description = rejection.description.as_str(),
                    "Call rejected"
                );
                let _ = self
                    .store
                    .append_log(
                        charge_point_id,
                        format!("❌ {} rejected ({}): {}", action, rejection.code, rejection.description),
                    )
                    .await;
                let reply = OcppFrame::call_error(unique_id, rejection.code, rejection.description);
                let _ = session.send_frame(reply.encode());
            }
        }
    }

    async fn dispatch(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: &Value,
    ) -> HandlerResult {
        match action {
            "BootNotification" => handle_boot_notification(self, charge_point_id, payload).await,
            "Heartbeat" => handle_heartbeat(self, charge_point_id, payload).await,
            "StatusNotification" => handle_status_notification(self, charge_point_id, payload).await,
            "Authorize" => handle_authorize(self, charge_point_id, payload).await,
            "StartTransaction" => handle_start_transaction(self, charge_point_id, payload).await,
            "StopTransaction" => handle_stop_transaction(self, charge_point_id, payload).await,
            "MeterValues" => handle_meter_values(self, charge_point_id, payload).await,
            "DataTransfer" => handle_data_transfer(self, charge_point_id, payload).await,
            "FirmwareStatusNotification" => {
                handle_firmware_status_notification(self, charge_point_id, payload).await
            }
            "DiagnosticsStatusNotification" => {
                handle_diagnostics_status_notification(self, charge_point_id, payload).await
            }
            // CSMS-originated actions arriving from a charger, and anything
            // else we have never heard of.
            _ => Err(CallRejection::not_implemented(action)),
        }
    }

    /// Any successfully decoded inbound frame counts as charger activity.
    async fn touch_charger(&self, charge_point_id: &str) {
        let _ = self
            .store
            .apply_charger_mutation(charge_point_id, Box::new(|c| c.touch_heartbeat()))
            .await;
    }
}
