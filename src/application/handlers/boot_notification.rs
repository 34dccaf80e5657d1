//! BootNotification handler

use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::{parse_payload, to_payload, HandlerReply, HandlerResult, OcppRouter};

/// Ensures the charger aggregate exists and replies Accepted. Availability
/// status is deliberately left alone; only StatusNotification changes it.
pub(super) async fn handle_boot_notification(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: BootNotificationRequest = parse_payload("BootNotification", payload)?;

    info!(
        charge_point_id,
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        "BootNotification"
    );

    router
        .store
        .upsert_charger(charge_point_id)
        .await?;

    let vendor = req.charge_point_vendor.clone();
    let model = req.charge_point_model.clone();
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| {
                c.vendor = Some(vendor);
                c.model = Some(model);
            }),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!(
                "BootNotification: vendor={}, model={}",
                req.charge_point_vendor, req.charge_point_model
            ),
        )
        .await?;

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: router.boot_interval_secs as _,
        status: RegistrationStatus::Accepted,
    };
    Ok(HandlerReply::of(to_payload(&response)))
}
