//! Store façade
//!
//! Narrow persistence interface consumed by the protocol engine. Hides
//! whether storage is in memory, file-backed, or external. Mutations of a
//! charger aggregate are serialized per charger id for the duration of one
//! `apply_charger_mutation` call; a mutation closure must never await.

use async_trait::async_trait;

use super::charger::{Charger, LogEntry};
use super::data_transfer::DataTransferTemplate;
use super::id_tag::IdTagEntry;
use crate::shared::errors::DomainResult;

/// A synchronous mutation applied to one charger aggregate under the
/// store's per-charger writer lock.
pub type ChargerMutation = Box<dyn FnOnce(&mut Charger) + Send>;

#[async_trait]
pub trait ChargerStore: Send + Sync {
    // ── Charger aggregates ─────────────────────────────────

    async fn get_charger(&self, id: &str) -> DomainResult<Option<Charger>>;
    async fn list_chargers(&self) -> DomainResult<Vec<Charger>>;
    /// Create the aggregate if missing, refresh its heartbeat watermark
    /// either way. Status and logs of an existing charger are preserved.
    async fn upsert_charger(&self, id: &str) -> DomainResult<Charger>;
    /// Explicit operator action; returns false when the charger is unknown.
    async fn delete_charger(&self, id: &str) -> DomainResult<bool>;
    /// Apply a mutation to an existing aggregate. Fails with
    /// `ChargerNotFound` when the charger does not exist.
    async fn apply_charger_mutation(
        &self,
        id: &str,
        mutation: ChargerMutation,
    ) -> DomainResult<()>;
    /// Server-chosen transaction id, unique within the charger's lifetime.
    async fn next_transaction_id(&self, id: &str) -> DomainResult<i32>;

    // ── Id-tag table ───────────────────────────────────────

    async fn get_id_tag(&self, tag: &str) -> DomainResult<Option<IdTagEntry>>;
    async fn upsert_id_tag(&self, entry: IdTagEntry) -> DomainResult<()>;
    async fn delete_id_tag(&self, tag: &str) -> DomainResult<bool>;
    async fn list_id_tags(&self) -> DomainResult<Vec<IdTagEntry>>;

    // ── Data-transfer templates ────────────────────────────

    async fn list_data_transfer_templates(&self) -> DomainResult<Vec<DataTransferTemplate>>;
    async fn get_data_transfer_template(&self, id: i32)
        -> DomainResult<Option<DataTransferTemplate>>;
    async fn save_data_transfer_template(
        &self,
        name: String,
        vendor_id: String,
        message_id: Option<String>,
        data: Option<String>,
    ) -> DomainResult<DataTransferTemplate>;
    async fn delete_data_transfer_template(&self, id: i32) -> DomainResult<bool>;

    // ── Local authorization list version ───────────────────

    /// Increment and return the global local-list version. Called exactly
    /// once per SendLocalList invocation.
    async fn next_local_list_version(&self) -> DomainResult<i32>;
    async fn local_list_version(&self) -> DomainResult<i32>;

    // ── Per-charger event log (log sink) ───────────────────

    async fn append_log(&self, id: &str, message: String) -> DomainResult<()>;
    /// Entries strictly newer than the charger's cleared-at watermark.
    async fn get_logs(&self, id: &str) -> DomainResult<Vec<LogEntry>>;
    async fn clear_logs(&self, id: &str) -> DomainResult<()>;
}
