//! Authorize handler

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use crate::domain::AuthorizationState;

use super::{parse_payload, to_payload, HandlerReply, HandlerResult, OcppRouter};

/// Accepted only for a tag that exists in the id-tag table with stored
/// status Accepted. Tags are never created implicitly.
pub(super) async fn handle_authorize(
    router: &OcppRouter,
    charge_point_id: &str,
    payload: &Value,
) -> HandlerResult {
    let req: AuthorizeRequest = parse_payload("Authorize", payload)?;

    info!(charge_point_id, id_tag = req.id_tag.as_str(), "Authorize");

    router
        .store
        .append_log(
            charge_point_id,
            format!("Authorization request for ID tag: {}", req.id_tag),
        )
        .await?;

    let known = router
        .store
        .get_id_tag(&req.id_tag)
        .await?;

    let status = match known {
        Some(entry) if entry.status == AuthorizationState::Accepted => {
            AuthorizationStatus::Accepted
        }
        _ => AuthorizationStatus::Invalid,
    };

    let response = AuthorizeResponse {
        id_tag_info: IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        },
    };
    Ok(HandlerReply::of(to_payload(&response)))
}
