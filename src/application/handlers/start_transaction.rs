//! StartTransaction handler

use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use super::{
    parse_payload, to_payload, FollowUp, HandlerReply, HandlerResult, OcppRouter,
};

/// Issues a server-chosen transaction id, records the transaction on the
/// connector, and arms the post-transaction scheduler once the reply is on
/// the wire. Accepted at protocol level even while another transaction is
/// active; policy rejection is the operator surface's concern.
pub(super) async fn handle_start_transaction(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: StartTransactionRequest = parse_payload("StartTransaction", payload)?;

    info!(
        charge_point_id,
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    let transaction_id = router
        .store
        .next_transaction_id(charge_point_id)
        .await?;

    let connector_id = req.connector_id;
    let id_tag = req.id_tag.clone();
    let meter_start = req.meter_start;
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| {
                c.begin_transaction(connector_id, transaction_id, &id_tag);
                c.meter_value = meter_start as f64;
            }),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!(
                "StartTransaction: connector={}, id_tag={}, meter_start={}",
                req.connector_id, req.id_tag, req.meter_start
            ),
        )
        .await?;
    router
        .store
        .append_log(
            charge_point_id,
            format!("✅ Transaction {} started", transaction_id),
        )
        .await?;

    let response = StartTransactionResponse {
        transaction_id,
        id_tag_info: IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        },
    };

    Ok(HandlerReply {
        payload: to_payload(&response),
        // Vendor data-transfer jobs fire only after the CallResult is
        // queued ahead of them on the single-writer channel.
        follow_up: Some(FollowUp::PostTransaction { transaction_id }),
    })
}
