//! Heartbeat handler

use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::{parse_payload, to_payload, HandlerReply, HandlerResult, OcppRouter};

pub(super) async fn handle_heartbeat(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let _req: HeartbeatRequest = parse_payload("Heartbeat", payload)?;

    info!(charge_point_id, "Heartbeat");

    // The watermark itself is refreshed by the router for every frame.
    router
        .store
        .append_log(charge_point_id, "Heartbeat received".to_string())
        .await?;

    let response = HeartbeatResponse {
        current_time: Utc::now(),
    };
    Ok(HandlerReply::of(to_payload(&response)))
}
