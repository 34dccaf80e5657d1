//! Charge point operator service
//!
//! The surface an operator API embeds: charger inventory, event logs,
//! id-tag administration, vendor settings, and data-transfer templates.
//! Everything goes through the store façade; protocol traffic stays in the
//! command dispatcher.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::{
    AuthorizationState, Charger, ChargerStore, DataTransferTemplate, DomainError, DomainResult,
    IdTagEntry, LogEntry, Reservation, StoredChargingProfile, VendorSettings,
};
use crate::shared::validations::validate_id_tag;

pub struct ChargePointService {
    store: Arc<dyn ChargerStore>,
}

impl ChargePointService {
    pub fn new(store: Arc<dyn ChargerStore>) -> Self {
        Self { store }
    }

    // ── Inventory ──────────────────────────────────────────

    pub async fn get_charger(&self, id: &str) -> DomainResult<Option<Charger>> {
        self.store.get_charger(id).await
    }

    pub async fn list_chargers(&self) -> DomainResult<Vec<Charger>> {
        self.store.list_chargers().await
    }

    /// Remove a charger and everything recorded on it. Explicit operator
    /// action; connected sessions are unaffected until they next touch the
    /// store.
    pub async fn delete_charger(&self, id: &str) -> DomainResult<bool> {
        self.store.delete_charger(id).await
    }

    // ── Event log ──────────────────────────────────────────

    pub async fn get_logs(&self, id: &str) -> DomainResult<Vec<LogEntry>> {
        self.store.get_logs(id).await
    }

    pub async fn clear_logs(&self, id: &str) -> DomainResult<()> {
        self.store.clear_logs(id).await?;
        info!(charge_point_id = id, "Logs cleared");
        Ok(())
    }

    // ── Id-tag administration ──────────────────────────────

    pub async fn add_id_tag(
        &self,
        id_tag: &str,
        status: AuthorizationState,
        expiry_date: Option<chrono::DateTime<Utc>>,
        parent_id_tag: Option<String>,
    ) -> DomainResult<()> {
        validate_id_tag(id_tag).map_err(DomainError::Validation)?;
        if let Some(parent) = &parent_id_tag {
            validate_id_tag(parent).map_err(DomainError::Validation)?;
        }
        self.store
            .upsert_id_tag(IdTagEntry {
                id_tag: id_tag.to_string(),
                status,
                expiry_date,
                parent_id_tag,
            })
            .await?;
        info!(id_tag, %status, "Id tag stored");
        Ok(())
    }

    pub async fn remove_id_tag(&self, id_tag: &str) -> DomainResult<bool> {
        self.store.delete_id_tag(id_tag).await
    }

    pub async fn list_id_tags(&self) -> DomainResult<Vec<IdTagEntry>> {
        self.store.list_id_tags().await
    }

    // ── Vendor settings ────────────────────────────────────

    pub async fn set_vendor_settings(
        &self,
        id: &str,
        settings: VendorSettings,
    ) -> DomainResult<()> {
        let vendor = settings.vendor_name();
        self.store
            .apply_charger_mutation(id, Box::new(move |c| c.vendor_settings = Some(settings)))
            .await?;
        self.store
            .append_log(id, format!("{} auto-stop settings configured", vendor))
            .await?;
        Ok(())
    }

    pub async fn clear_vendor_settings(&self, id: &str) -> DomainResult<()> {
        self.store
            .apply_charger_mutation(id, Box::new(|c| c.vendor_settings = None))
            .await?;
        self.store
            .append_log(id, "Vendor auto-stop settings cleared".to_string())
            .await?;
        Ok(())
    }

    // ── Reservations & charging profiles (read side) ───────

    /// Active reservations; expired entries are pruned on the way out.
    pub async fn get_reservations(&self, id: &str) -> DomainResult<Vec<Reservation>> {
        let now = Utc::now();
        self.store
            .apply_charger_mutation(
                id,
                Box::new(move |c| {
                    c.active_reservations(now);
                }),
            )
            .await?;
        let charger = self
            .store
            .get_charger(id)
            .await?
            .ok_or_else(|| DomainError::ChargerNotFound(id.to_string()))?;
        Ok(charger.reservations.values().cloned().collect())
    }

    pub async fn get_charging_profiles(
        &self,
        id: &str,
        connector_id: Option<u32>,
    ) -> DomainResult<Vec<StoredChargingProfile>> {
        let charger = self
            .store
            .get_charger(id)
            .await?
            .ok_or_else(|| DomainError::ChargerNotFound(id.to_string()))?;
        Ok(charger
            .charging_profiles
            .iter()
            .filter(|(connector, _)| connector_id.map_or(true, |wanted| **connector == wanted))
            .flat_map(|(_, profiles)| profiles.values().cloned())
            .collect())
    }

    // ── Data-transfer templates ────────────────────────────

    pub async fn save_template(
        &self,
        name: String,
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    ) -> DomainResult<DataTransferTemplate> {
        if name.trim().is_empty() {
            return Err(DomainError::Validation(
                "template name must not be empty".to_string(),
            ));
        }
        if vendor_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "template vendorId must not be empty".to_string(),
            ));
        }
        self.store
            .save_data_transfer_template(name, vendor_id, message_id, data)
            .await
    }

    pub async fn list_templates(&self) -> DomainResult<Vec<DataTransferTemplate>> {
        self.store.list_data_transfer_templates().await
    }

    pub async fn delete_template(&self, id: i32) -> DomainResult<bool> {
        self.store.delete_data_transfer_template(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStore;
    use chrono::Duration;

    fn service() -> (ChargePointService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (ChargePointService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn id_tag_administration() {
        let (service, _) = service();
        service
            .add_id_tag("TAG-1", AuthorizationState::Accepted, None, None)
            .await
            .unwrap();

        let tags = service.list_id_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id_tag, "TAG-1");

        assert!(service.remove_id_tag("TAG-1").await.unwrap());
        assert!(service.list_id_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_id_tag_is_rejected() {
        let (service, _) = service();
        let err = service
            .add_id_tag(&"X".repeat(21), AuthorizationState::Accepted, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn vendor_settings_roundtrip() {
        let (service, store) = service();
        store.upsert_charger("C1").await.unwrap();

        service
            .set_vendor_settings("C1", VendorSettings::msil(1000))
            .await
            .unwrap();
        let charger = store.get_charger("C1").await.unwrap().unwrap();
        assert!(matches!(
            charger.vendor_settings,
            Some(VendorSettings::Msil { .. })
        ));

        service.clear_vendor_settings("C1").await.unwrap();
        let charger = store.get_charger("C1").await.unwrap().unwrap();
        assert!(charger.vendor_settings.is_none());
    }

    #[tokio::test]
    async fn reservations_read_prunes_expired() {
        let (service, store) = service();
        store.upsert_charger("C1").await.unwrap();
        store
            .apply_charger_mutation(
                "C1",
                Box::new(|c| {
                    c.add_reservation(Reservation::new(
                        1,
                        1,
                        "OLD",
                        None,
                        Utc::now() - Duration::minutes(5),
                    ));
                    c.add_reservation(Reservation::new(
                        2,
                        1,
                        "NEW",
                        None,
                        Utc::now() + Duration::hours(1),
                    ));
                }),
            )
            .await
            .unwrap();

        let active = service.get_reservations("C1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].reservation_id, 2);
    }

    #[tokio::test]
    async fn template_crud_with_validation() {
        let (service, _) = service();
        let err = service
            .save_template("".into(), "V".into(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let template = service
            .save_template("stop".into(), "Test_Server".into(), Some("Stop_Energy".into()), None)
            .await
            .unwrap();
        assert_eq!(service.list_templates().await.unwrap().len(), 1);
        assert!(service.delete_template(template.id).await.unwrap());
        assert!(service.list_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_charger_removes_aggregate() {
        let (service, store) = service();
        store.upsert_charger("C1").await.unwrap();
        assert!(service.delete_charger("C1").await.unwrap());
        assert!(service.get_charger("C1").await.unwrap().is_none());
        assert!(!service.delete_charger("C1").await.unwrap());
    }
}
