//! StopTransaction handler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionRequest;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_payload, HandlerReply, HandlerResult, OcppRouter};

/// Clears the transaction when the reported id matches the active one; a
/// mismatched id clears nothing. Either way the reply is an empty payload,
/// never a CallError.
pub(super) async fn handle_stop_transaction(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: StopTransactionRequest = parse_payload("StopTransaction", payload)?;

    info!(
        charge_point_id,
        transaction_id = req.transaction_id,
        meter_stop = req.meter_stop,
        "StopTransaction"
    );

    let cleared = Arc::new(AtomicBool::new(false));
    let cleared_flag = cleared.clone();
    let transaction_id = req.transaction_id;
    let meter_stop = req.meter_stop;
    router
        .store
        .apply_charger_mutation(
            charge_point_id,
            Box::new(move |c| {
                if c.end_transaction(transaction_id) {
                    c.meter_value = meter_stop as f64;
                    cleared_flag.store(true, Ordering::SeqCst);
                }
            }),
        )
        .await?;

    router
        .store
        .append_log(
            charge_point_id,
            format!(
                "StopTransaction: transaction_id={}, meter_stop={}",
                req.transaction_id, req.meter_stop
            ),
        )
        .await?;

    if cleared.load(Ordering::SeqCst) {
        router
            .store
            .append_log(
                charge_point_id,
                format!("✅ Transaction {} stopped", req.transaction_id),
            )
            .await?;
    } else {
        router
            .store
            .append_log(
                charge_point_id,
                format!(
                    "⚠️ StopTransaction for unknown transaction {}, nothing cleared",
                    req.transaction_id
                ),
            )
            .await?;
    }

    Ok(HandlerReply::of(json!({})))
}
