//! Post-transaction vendor data-transfer scheduler
//!
//! Armed by the StartTransaction handler after the CallResult is queued.
//! After a fixed delay (500 ms by default) the charger's vendor settings
//! decide which deferred DataTransfer packets go out. Every packet runs in
//! its own task: one failing packet affects neither the others nor the
//! original transaction.

use std::sync::Arc;
use std::time::Duration;

use rust_ocpp::v1_6::messages::data_transfer::DataTransferRequest;
use serde_json::json;
use tracing::{debug, error, info};

use crate::domain::{ChargerStore, VendorSettings};
use crate::session::{CallFailure, Session};

/// Vendor id used for Jio_BP stop packets.
const JIO_BP_VENDOR: &str = "Test_Server";

pub struct PostTransactionScheduler {
    store: Arc<dyn ChargerStore>,
    delay: Duration,
    call_timeout: Duration,
}

impl PostTransactionScheduler {
    pub fn new(store: Arc<dyn ChargerStore>, delay: Duration, call_timeout: Duration) -> Self {
        Self {
            store,
            delay,
            call_timeout,
        }
    }

    /// Schedule the vendor jobs for a freshly started transaction. Returns
    /// immediately; all waiting happens on detached tasks.
    pub fn arm(&self, session: Arc<Session>, transaction_id: i32) {
        let store = self.store.clone();
        let delay = self.delay;
        let call_timeout = self.call_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let charge_point_id = session.charge_point_id().to_string();
            let settings = match store.get_charger(&charge_point_id).await {
                Ok(Some(charger)) => charger.vendor_settings,
                Ok(None) => None,
                Err(e) => {
                    error!(
                        charge_point_id = charge_point_id.as_str(),
                        error = %e,
                        "Could not load vendor settings"
                    );
                    return;
                }
            };

            let Some(settings) = settings else {
                debug!(
                    charge_point_id = charge_point_id.as_str(),
                    "No vendor settings configured, nothing to send"
                );
                return;
            };

            match settings {
                VendorSettings::JioBp {
                    stop_energy_enabled,
                    stop_energy_value,
                    stop_time_enabled,
                    stop_time_value,
                } => {
                    if stop_energy_enabled {
                        spawn_jio_bp_packet(
                            store.clone(),
                            session.clone(),
                            call_timeout,
                            transaction_id,
                            "Stop_Energy",
                            stop_energy_value,
                        );
                    }
                    if stop_time_enabled {
                        spawn_jio_bp_packet(
                            store,
                            session,
                            call_timeout,
                            transaction_id,
                            "Stop_Time",
                            stop_time_value,
                        );
                    }
                }
                VendorSettings::Msil {
                    auto_stop_enabled,
                    stop_energy_value,
                } => {
                    if auto_stop_enabled {
                        tokio::spawn(send_msil_packet(
                            store,
                            session,
                            call_timeout,
                            transaction_id,
                            stop_energy_value,
                        ));
                    }
                }
                VendorSettings::Cz {
                    auto_stop_enabled,
                    stop_energy_value,
                } => {
                    if auto_stop_enabled {
                        tokio::spawn(send_cz_packet(
                            store,
                            session,
                            call_timeout,
                            transaction_id,
                            stop_energy_value,
                        ));
                    }
                }
            }
        });
    }
}

fn spawn_jio_bp_packet(
    store: Arc<dyn ChargerStore>,
    session: Arc<Session>,
    call_timeout: Duration,
    transaction_id: i32,
    message_id: &'static str,
    value: i64,
) {
    tokio::spawn(async move {
        let charge_point_id = session.charge_point_id().to_string();
        let data = format!("{}_{}", transaction_id, value);
        let request = DataTransferRequest {
            vendor_string: JIO_BP_VENDOR.to_string(),
            message_id: Some(message_id.to_string()),
            data: Some(data.clone()),
        };
        let payload = serde_json::to_value(&request).unwrap_or_default();

        match session.call("DataTransfer", payload, call_timeout).await {
            Ok(reply) => {
                let status = reply["status"].as_str().unwrap_or("Unknown").to_string();
                info!(
                    charge_point_id = charge_point_id.as_str(),
                    message_id, data = data.as_str(), status = status.as_str(),
                    "Jio_BP packet sent"
                );
                let _ = store
                    .append_log(
                        &charge_point_id,
                        format!(
                            "Jio_BP DataTransfer sent: messageId={}, data={}, status={}",
                            message_id, data, status
                        ),
                    )
                    .await;
            }
            Err(e) => {
                error!(
                    charge_point_id = charge_point_id.as_str(),
                    message_id, error = %e, "Jio_BP packet failed"
                );
                let _ = store
                    .append_log(
                        &charge_point_id,
                        format!("❌ Jio_BP packet {} failed: {}", message_id, e),
                    )
                    .await;
            }
        }
    });
}

/// MSIL wants `data` as a JSON object, which OCPP 1.6 forbids. The frame is
/// sent that way on purpose; a TypeConstraintViolation reply from the
/// charger is treated as accepted (customer-requested interop deviation).
async fn send_msil_packet(
    store: Arc<dyn ChargerStore>,
    session: Arc<Session>,
    call_timeout: Duration,
    transaction_id: i32,
    value: i64,
) {
    let charge_point_id = session.charge_point_id().to_string();
    let data = json!({
        "transactionId": transaction_id,
        "parameter": "Stop_Energy",
        "value": value,
    });

    let _ = store
        .append_log(
            &charge_point_id,
            "⚠️ MSIL DataTransfer: data field sent as OBJECT instead of STRING (customer interop requirement)"
                .to_string(),
        )
        .await;
    let _ = store
        .append_log(
            &charge_point_id,
            format!(
                "MSIL packet: vendorId=MSIL, messageId=AutoStop, data={} [VIOLATES OCPP 1.6]",
                data
            ),
        )
        .await;

    let payload = json!({
        "vendorId": "MSIL",
        "messageId": "AutoStop",
        "data": data,
    });

    match session.call("DataTransfer", payload, call_timeout).await {
        Ok(reply) => {
            let status = reply["status"].as_str().unwrap_or("Unknown").to_string();
            info!(
                charge_point_id = charge_point_id.as_str(),
                status = status.as_str(),
                "MSIL packet sent"
            );
            let _ = store
                .append_log(
                    &charge_point_id,
                    format!("✅ MSIL DataTransfer with OBJECT data sent, status={}", status),
                )
                .await;
        }
        Err(CallFailure::CallError { code, .. }) if code == "TypeConstraintViolation" => {
            info!(
                charge_point_id = charge_point_id.as_str(),
                "MSIL packet answered TypeConstraintViolation, treated as accepted"
            );
            let _ = store
                .append_log(
                    &charge_point_id,
                    "⚠️ MSIL DataTransfer answered TypeConstraintViolation (expected), treated as accepted"
                        .to_string(),
                )
                .await;
        }
        Err(e) => {
            error!(charge_point_id = charge_point_id.as_str(), error = %e, "MSIL packet failed");
            let _ = store
                .append_log(&charge_point_id, format!("❌ MSIL packet failed: {}", e))
                .await;
        }
    }
}

/// CZ takes the same logical payload as MSIL, serialized compliantly as a
/// JSON string.
async fn send_cz_packet(
    store: Arc<dyn ChargerStore>,
    session: Arc<Session>,
    call_timeout: Duration,
    transaction_id: i32,
    value: i64,
) {
    let charge_point_id = session.charge_point_id().to_string();
    let data = json!({
        "transactionId": transaction_id,
        "parameter": "Stop_Energy",
        "value": value,
    })
    .to_string();

    let request = DataTransferRequest {
        vendor_string: "CZ".to_string(),
        message_id: Some("AutoStop".to_string()),
        data: Some(data.clone()),
    };
    let payload = serde_json::to_value(&request).unwrap_or_default();

    match session.call("DataTransfer", payload, call_timeout).await {
        Ok(reply) => {
            let status = reply["status"].as_str().unwrap_or("Unknown").to_string();
            info!(
                charge_point_id = charge_point_id.as_str(),
                status = status.as_str(),
                "CZ packet sent"
            );
            let _ = store
                .append_log(
                    &charge_point_id,
                    format!("CZ DataTransfer sent: data={}, status={}", data, status),
                )
                .await;
        }
        Err(e) => {
            error!(charge_point_id = charge_point_id.as_str(), error = %e, "CZ packet failed");
            let _ = store
                .append_log(&charge_point_id, format!("❌ CZ packet failed: {}", e))
                .await;
        }
    }
}
