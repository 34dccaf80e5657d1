//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::types::{Measurand, UnitOfMeasure};
use serde_json::{json, Value};
use tracing::info;

use super::{parse_payload, HandlerReply, HandlerResult, OcppRouter};

/// Persists the latest energy reading (Wh) on the aggregate.
pub(super) async fn handle_meter_values(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: MeterValuesRequest = parse_payload("MeterValues", payload)?;

    let sample_count: usize = req.meter_value.iter().map(|m| m.sampled_value.len()).sum();
    info!(
        charge_point_id,
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        samples = sample_count,
        "MeterValues"
    );

    let energy_wh = latest_energy_wh(&req);

    if let Some(energy) = energy_wh {
        router
            .store
            .apply_charger_mutation(
                charge_point_id,
                Box::new(move |c| c.meter_value = energy),
            )
            .await?;
    }

    router
        .store
        .append_log(
            charge_point_id,
            format!(
                "MeterValues: connector={}, {} readings",
                req.connector_id,
                req.meter_value.len()
            ),
        )
        .await?;

    Ok(HandlerReply::of(json!({})))
}

/// Last Energy.Active.Import.Register sample, normalized to Wh. A sample
/// without a measurand counts as energy (OCPP default).
fn latest_energy_wh(req: &MeterValuesRequest) -> Option<f64> {
    let mut energy = None;
    for meter_value in &req.meter_value {
        for sampled in &meter_value.sampled_value {
            let value: f64 = match sampled.value.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let measurand = sampled
                .measurand
                .clone()
                .unwrap_or(Measurand::EnergyActiveImportRegister);
            if matches!(measurand, Measurand::EnergyActiveImportRegister) {
                let wh = match sampled.unit.as_ref() {
                    Some(UnitOfMeasure::KWh) => value * 1000.0,
                    _ => value,
                };
                energy = Some(wh);
            }
        }
    }
    energy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(samples: Value) -> MeterValuesRequest {
        serde_json::from_value(json!({
            "connectorId": 1,
            "meterValue": samples,
        }))
        .unwrap()
    }

    #[test]
    fn plain_value_defaults_to_energy_in_wh() {
        let req = request(json!([
            {"timestamp": "2024-06-01T10:00:00Z", "sampledValue": [{"value": "1234"}]}
        ]));
        assert_eq!(latest_energy_wh(&req), Some(1234.0));
    }

    #[test]
    fn kwh_values_are_scaled() {
        let req = request(json!([
            {"timestamp": "2024-06-01T10:00:00Z", "sampledValue": [
                {"value": "1.5", "measurand": "Energy.Active.Import.Register", "unit": "kWh"}
            ]}
        ]));
        assert_eq!(latest_energy_wh(&req), Some(1500.0));
    }

    #[test]
    fn non_energy_measurands_are_ignored() {
        let req = request(json!([
            {"timestamp": "2024-06-01T10:00:00Z", "sampledValue": [
                {"value": "42", "measurand": "Power.Active.Import"}
            ]}
        ]));
        assert_eq!(latest_energy_wh(&req), None);
    }

    #[test]
    fn last_reading_wins() {
        let req = request(json!([
            {"timestamp": "2024-06-01T10:00:00Z", "sampledValue": [{"value": "100"}]},
            {"timestamp": "2024-06-01T10:01:00Z", "sampledValue": [{"value": "200"}]}
        ]));
        assert_eq!(latest_energy_wh(&req), Some(200.0));
    }
}
