//! In-memory store
//!
//! DashMap-backed implementation of the store façade. Each charger entry is
//! mutated under its shard lock, which serializes writers per charger id.
//! An optional JSON snapshot (see [`snapshot`](super::snapshot)) makes the
//! state survive restarts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::domain::{
    Charger, ChargerMutation, ChargerStore, DataTransferTemplate, DomainError, DomainResult,
    IdTagEntry, LogEntry,
};

use super::snapshot::{self, StoreSnapshot};

/// In-memory storage with optional file-backed persistence.
pub struct InMemoryStore {
    chargers: DashMap<String, Charger>,
    id_tags: DashMap<String, IdTagEntry>,
    templates: DashMap<i32, DataTransferTemplate>,
    template_counter: AtomicI32,
    local_list_version: AtomicI32,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chargers: DashMap::new(),
            id_tags: DashMap::new(),
            templates: DashMap::new(),
            template_counter: AtomicI32::new(1),
            local_list_version: AtomicI32::new(0),
            snapshot_path: None,
        }
    }

    /// Load state from `path` if it exists and persist after each mutation.
    pub fn with_snapshot(path: PathBuf) -> Self {
        let store = Self::new();
        match snapshot::load(&path) {
            Ok(Some(snap)) => {
                info!(path = %path.display(), chargers = snap.chargers.len(), "Loaded store snapshot");
                store.restore(snap);
            }
            Ok(None) => info!(path = %path.display(), "No store snapshot yet, starting empty"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load store snapshot, starting empty"),
        }
        Self {
            snapshot_path: Some(path),
            ..store
        }
    }

    fn restore(&self, snap: StoreSnapshot) {
        for charger in snap.chargers {
            self.chargers.insert(charger.charge_point_id.clone(), charger);
        }
        for tag in snap.id_tags {
            self.id_tags.insert(tag.id_tag.clone(), tag);
        }
        let next_template = snap
            .templates
            .iter()
            .map(|t| t.id)
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        for template in snap.templates {
            self.templates.insert(template.id, template);
        }
        self.template_counter.store(next_template, Ordering::SeqCst);
        self.local_list_version
            .store(snap.local_list_version, Ordering::SeqCst);
    }

    fn capture(&self) -> StoreSnapshot {
        StoreSnapshot {
            chargers: self.chargers.iter().map(|e| e.value().clone()).collect(),
            id_tags: self.id_tags.iter().map(|e| e.value().clone()).collect(),
            templates: self.templates.iter().map(|e| e.value().clone()).collect(),
            local_list_version: self.local_list_version.load(Ordering::SeqCst),
        }
    }

    /// Write the snapshot file, if configured. Best effort: a failed write
    /// is logged and does not fail the calling operation.
    pub fn persist(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = snapshot::save(path, &self.capture()) {
                warn!(path = %path.display(), error = %e, "Failed to write store snapshot");
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChargerStore for InMemoryStore {
    async fn get_charger(&self, id: &str) -> DomainResult<Option<Charger>> {
        Ok(self.chargers.get(id).map(|c| c.clone()))
    }

    async fn list_chargers(&self) -> DomainResult<Vec<Charger>> {
        Ok(self.chargers.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert_charger(&self, id: &str) -> DomainResult<Charger> {
        let mut entry = self
            .chargers
            .entry(id.to_string())
            .or_insert_with(|| Charger::new(id));
        entry.touch_heartbeat();
        let charger = entry.clone();
        drop(entry);
        self.persist();
        Ok(charger)
    }

    async fn delete_charger(&self, id: &str) -> DomainResult<bool> {
        let removed = self.chargers.remove(id).is_some();
        if removed {
            info!(charge_point_id = id, "Charger deleted");
            self.persist();
        }
        Ok(removed)
    }

    async fn apply_charger_mutation(
        &self,
        id: &str,
        mutation: ChargerMutation,
    ) -> DomainResult<()> {
        match self.chargers.get_mut(id) {
            Some(mut entry) => {
                mutation(entry.value_mut());
                drop(entry);
                self.persist();
                Ok(())
            }
            None => Err(DomainError::ChargerNotFound(id.to_string())),
        }
    }

    async fn next_transaction_id(&self, id: &str) -> DomainResult<i32> {
        match self.chargers.get_mut(id) {
            Some(mut entry) => {
                let tx = entry.value_mut().next_transaction_id();
                drop(entry);
                self.persist();
                Ok(tx)
            }
            None => Err(DomainError::ChargerNotFound(id.to_string())),
        }
    }

    async fn get_id_tag(&self, tag: &str) -> DomainResult<Option<IdTagEntry>> {
        Ok(self.id_tags.get(tag).map(|t| t.clone()))
    }

    async fn upsert_id_tag(&self, entry: IdTagEntry) -> DomainResult<()> {
        self.id_tags.insert(entry.id_tag.clone(), entry);
        self.persist();
        Ok(())
    }

    async fn delete_id_tag(&self, tag: &str) -> DomainResult<bool> {
        let removed = self.id_tags.remove(tag).is_some();
        if removed {
            self.persist();
        }
        Ok(removed)
    }

    async fn list_id_tags(&self) -> DomainResult<Vec<IdTagEntry>> {
        Ok(self.id_tags.iter().map(|e| e.value().clone()).collect())
    }

    async fn list_data_transfer_templates(&self) -> DomainResult<Vec<DataTransferTemplate>> {
        let mut templates: Vec<_> = self.templates.iter().map(|e| e.value().clone()).collect();
        templates.sort_by_key(|t| t.id);
        Ok(templates)
    }

    async fn get_data_transfer_template(
        &self,
        id: i32,
    ) -> DomainResult<Option<DataTransferTemplate>> {
        Ok(self.templates.get(&id).map(|t| t.clone()))
    }

    async fn save_data_transfer_template(
        &self,
        name: String,
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    ) -> DomainResult<DataTransferTemplate> {
        let id = self.template_counter.fetch_add(1, Ordering::SeqCst);
        let template = DataTransferTemplate {
            id,
            name,
            vendor_id,
            message_id,
            data,
            created_at: Utc::now(),
        };
        self.templates.insert(id, template.clone());
        self.persist();
        Ok(template)
    }

    async fn delete_data_transfer_template(&self, id: i32) -> DomainResult<bool> {
        let removed = self.templates.remove(&id).is_some();
        if removed {
            self.persist();
        }
        Ok(removed)
    }

    async fn next_local_list_version(&self) -> DomainResult<i32> {
        let version = self.local_list_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.persist();
        Ok(version)
    }

    async fn local_list_version(&self) -> DomainResult<i32> {
        Ok(self.local_list_version.load(Ordering::SeqCst))
    }

    async fn append_log(&self, id: &str, message: String) -> DomainResult<()> {
        match self.chargers.get_mut(id) {
            Some(mut entry) => {
                entry.value_mut().append_log(message);
                drop(entry);
                self.persist();
                Ok(())
            }
            None => {
                warn!(charge_point_id = id, "Log append for unknown charger dropped");
                Ok(())
            }
        }
    }

    async fn get_logs(&self, id: &str) -> DomainResult<Vec<LogEntry>> {
        match self.chargers.get(id) {
            Some(entry) => Ok(entry.visible_logs()),
            None => Err(DomainError::ChargerNotFound(id.to_string())),
        }
    }

    async fn clear_logs(&self, id: &str) -> DomainResult<()> {
        match self.chargers.get_mut(id) {
            Some(mut entry) => {
                entry.value_mut().clear_logs();
                drop(entry);
                self.persist();
                Ok(())
            }
            None => Err(DomainError::ChargerNotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthorizationState;

    #[tokio::test]
    async fn upsert_preserves_existing_state() {
        let store = InMemoryStore::new();
        store.upsert_charger("CP1").await.unwrap();
        store
            .apply_charger_mutation(
                "CP1",
                Box::new(|c| {
                    c.status = "Charging".to_string();
                    c.append_log("something happened");
                }),
            )
            .await
            .unwrap();

        let again = store.upsert_charger("CP1").await.unwrap();
        assert_eq!(again.status, "Charging");
        assert_eq!(again.logs.len(), 1);
    }

    #[tokio::test]
    async fn mutation_on_unknown_charger_fails() {
        let store = InMemoryStore::new();
        let err = store
            .apply_charger_mutation("nope", Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ChargerNotFound(_)));
    }

    #[tokio::test]
    async fn local_list_version_is_strictly_increasing() {
        let store = InMemoryStore::new();
        assert_eq!(store.local_list_version().await.unwrap(), 0);
        let mut last = 0;
        for _ in 0..5 {
            let v = store.next_local_list_version().await.unwrap();
            assert!(v > last);
            last = v;
        }
        assert_eq!(store.local_list_version().await.unwrap(), last);
    }

    #[tokio::test]
    async fn log_sink_respects_clear_watermark() {
        let store = InMemoryStore::new();
        store.upsert_charger("CP1").await.unwrap();
        store.append_log("CP1", "first".to_string()).await.unwrap();
        store.clear_logs("CP1").await.unwrap();
        store.append_log("CP1", "second".to_string()).await.unwrap();

        let logs = store.get_logs("CP1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "second");
    }

    #[tokio::test]
    async fn id_tag_crud() {
        let store = InMemoryStore::new();
        store
            .upsert_id_tag(IdTagEntry::accepted("TAG-1"))
            .await
            .unwrap();

        let tag = store.get_id_tag("TAG-1").await.unwrap().unwrap();
        assert_eq!(tag.status, AuthorizationState::Accepted);

        assert!(store.delete_id_tag("TAG-1").await.unwrap());
        assert!(store.get_id_tag("TAG-1").await.unwrap().is_none());
        assert!(!store.delete_id_tag("TAG-1").await.unwrap());
    }

    #[tokio::test]
    async fn template_ids_are_assigned_sequentially() {
        let store = InMemoryStore::new();
        let a = store
            .save_data_transfer_template("a".into(), "V".into(), None, None)
            .await
            .unwrap();
        let b = store
            .save_data_transfer_template("b".into(), "V".into(), None, Some("data".into()))
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.list_data_transfer_templates().await.unwrap().len(), 2);
    }
}
