//! StatusNotification handler

use rust_ocpp::v1_6::messages::status_notification::StatusNotificationRequest;
use serde_json::{json, Value};
use tracing::info;

use super::{
    parse_payload, wire_string, HandlerReply, HandlerResult, OcppRouter,
};

/// Mirrors the reported status onto the connector entry and the aggregate.
/// Any status from the OCPP ChargePointStatus set is accepted as-is.
pub(super) async fn handle_status_notification(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: StatusNotificationRequest = parse_payload("StatusNotification", payload)?;

    let status = wire_string(&req.status);
    let error_code = wire_string(&req.error_code);

    info!(
        charge_point_id,
        connector_id = req.connector_id,
        status = status.as_str(),
        error_code = error_code.as_str(),
        "StatusNotification"
    );

    let connector_id = req.connector_id;
    let status_for_mutation = status.clone();
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| {
                c.update_connector_status(connector_id, &status_for_mutation);
                c.status = status_for_mutation;
            }),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!(
                "StatusNotification: connector={}, error_code={}, status={}",
                req.connector_id, error_code, status
            ),
        )
        .await?;

    Ok(HandlerReply::of(json!({})))
}
