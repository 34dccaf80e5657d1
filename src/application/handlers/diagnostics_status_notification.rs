//! DiagnosticsStatusNotification handler

use rust_ocpp::v1_6::messages::diagnostics_status_notification::DiagnosticsStatusNotificationRequest;
use serde_json::{json, Value};
use tracing::info;

use super::{
    parse_payload, wire_string, HandlerReply, HandlerResult, OcppRouter,
};

pub(super) async fn handle_diagnostics_status_notification(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: DiagnosticsStatusNotificationRequest =
        parse_payload("DiagnosticsStatusNotification", payload)?;

    let status = wire_string(&req.status);
    info!(charge_point_id, status = status.as_str(), "DiagnosticsStatusNotification");

    let status_for_mutation = status.clone();
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| c.diagnostics_status = Some(status_for_mutation)),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!("DiagnosticsStatusNotification: status={}", status),
        )
        .await?;

    Ok(HandlerReply::of(json!({})))
}
