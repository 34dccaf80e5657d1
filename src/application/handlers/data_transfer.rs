//! Inbound DataTransfer handler
//!
//! Parsed by hand instead of through the typed request: OCPP 1.6 requires
//! `data` to be a string, but some vendor firmware (MSIL) sends a JSON
//! object. Those frames are accepted, answered Accepted, and recorded with
//! an audit warning.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::domain::DataTransferRecord;
use crate::shared::ocpp_frame::CallErrorCode;

use super::{CallRejection, HandlerReply, HandlerResult, OcppRouter};

pub(super) async fn handle_data_transfer(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let vendor_id = payload
        .get("vendorId")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CallRejection::new(
                CallErrorCode::FormationViolation,
                "DataTransfer payload is missing vendorId",
            )
        })?
        .to_string();
    let message_id = payload
        .get("messageId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let data = payload.get("data").filter(|v| !v.is_null()).cloned();

    info!(
        charge_point_id,
        vendor_id = vendor_id.as_str(),
        message_id = ?message_id,
        "DataTransfer"
    );

    let log_line = match &data {
        Some(Value::Object(_)) => {
            warn!(
                charge_point_id,
                vendor_id = vendor_id.as_str(),
                "DataTransfer with object data accepted (violates OCPP 1.6)"
            );
            router
                .store
                .append_log(
                    charge_point_id,
                    "⚠️ DataTransfer from charger: data field received as OBJECT instead of STRING"
                        .to_string(),
                )
                .await?;
            format!(
                "📥 Charger DataTransfer: vendorId={}, messageId={:?}, data={} [VIOLATES OCPP 1.6]",
                vendor_id,
                message_id,
                data.as_ref().map(Value::to_string).unwrap_or_default()
            )
        }
        Some(Value::String(s)) => format!(
            "✅ DataTransfer from charger: vendorId={}, messageId={:?}, data={}",
            vendor_id, message_id, s
        ),
        Some(other) => format!(
            "⚠️ DataTransfer from charger: vendorId={}, messageId={:?}, data={} [unexpected type]",
            vendor_id, message_id, other
        ),
        None => format!(
            "DataTransfer from charger: vendorId={}, messageId={:?}, no data",
            vendor_id, message_id
        ),
    };
    router
        .store
        .append_log(charge_point_id, log_line)
        .await?;

    let record = DataTransferRecord::new(vendor_id, message_id, data);
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| c.record_data_transfer(record)),
        )
        .await?;

    Ok(HandlerReply::of(json!({ "status": "Accepted" })))
}
