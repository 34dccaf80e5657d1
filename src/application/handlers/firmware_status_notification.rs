//! FirmwareStatusNotification handler

use rust_ocpp::v1_6::messages::firmware_status_notification::FirmwareStatusNotificationRequest;
use serde_json::{json, Value};
use tracing::info;

use super::{
    parse_payload, wire_string, HandlerReply, HandlerResult, OcppRouter,
};

pub(super) async fn handle_firmware_status_notification(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: FirmwareStatusNotificationRequest =
        parse_payload("FirmwareStatusNotification", payload)?;

    let status = wire_string(&req.status);
    info!(charge_point_id, status = status.as_str(), "FirmwareStatusNotification");

    let status_for_mutation = status.clone();
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| c.firmware_status = Some(status_for_mutation)),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!("FirmwareStatusNotification: status={}", status),
        )
        .await?;

    Ok(HandlerReply::of(json!({})))
}
