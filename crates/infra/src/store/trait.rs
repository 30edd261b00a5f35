use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockledger_catalog::{Category, CategoryId, Item, ItemId, Location, LocationId, Supplier, SupplierId};
use stockledger_core::{AggregateId, Page, PageRequest, TenantId};
use stockledger_events::{AuditAction, AuditRecord};
use stockledger_ledger::{InventoryLevel, LevelKey, MovementReason, StockMovement};
use stockledger_workflows::{DocumentId, DocumentKind, DocumentStatus, Workflow};

/// Persistence error.
///
/// These are **infrastructure errors** as opposed to domain errors. Unique
/// and optimistic-version violations are reported as `Conflict` so callers
/// can surface them the same way as a disallowed transition.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A workflow document as persisted: indexed header columns plus the full
/// JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub kind: DocumentKind,
    pub number: String,
    pub status: DocumentStatus,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub body: JsonValue,
}

impl DocumentRecord {
    pub fn encode<W: Workflow>(doc: &W) -> Result<Self, StoreError> {
        let header = doc.header();
        let body = serde_json::to_value(doc)
            .map_err(|e| StoreError::Backend(format!("document serialization failed: {e}")))?;
        Ok(Self {
            id: header.id,
            tenant_id: header.tenant_id,
            kind: header.kind,
            number: header.number.clone(),
            status: header.status,
            version: header.version,
            updated_at: header.updated_at,
            body,
        })
    }

    pub fn decode<W: Workflow>(&self) -> Result<W, StoreError> {
        if self.kind != W::KIND {
            return Err(StoreError::Backend(format!(
                "document {} is a {}, not a {}",
                self.id,
                self.kind,
                W::KIND
            )));
        }
        serde_json::from_value(self.body.clone())
            .map_err(|e| StoreError::Backend(format!("document deserialization failed: {e}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelFilter {
    pub item_id: Option<ItemId>,
    pub location_id: Option<LocationId>,
    /// Only levels with a reorder point set and `available <= reorder_point`.
    pub needs_reorder: bool,
}

impl LevelFilter {
    pub fn matches(&self, level: &InventoryLevel) -> bool {
        let key = level.key();
        self.item_id.is_none_or(|id| key.item_id == id)
            && self.location_id.is_none_or(|id| key.location_id == id)
            && (!self.needs_reorder || level.needs_reorder())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub item_id: Option<ItemId>,
    pub location_id: Option<LocationId>,
    pub reason: Option<MovementReason>,
    pub ref_id: Option<AggregateId>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn matches(&self, m: &StockMovement) -> bool {
        self.item_id.is_none_or(|id| m.item_id == id)
            && self.location_id.is_none_or(|id| m.location_id == id)
            && self.reason.is_none_or(|r| m.reason == r)
            && self.ref_id.is_none_or(|id| m.reference.ref_id == Some(id))
            && self.occurred_after.is_none_or(|t| m.occurred_at >= t)
            && self.occurred_before.is_none_or(|t| m.occurred_at <= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, r: &AuditRecord) -> bool {
        self.entity.as_deref().is_none_or(|e| r.entity == e)
            && self.entity_id.as_deref().is_none_or(|id| r.entity_id == id)
            && self.action.is_none_or(|a| r.action == a)
            && self.after.is_none_or(|t| r.at >= t)
            && self.before.is_none_or(|t| r.at <= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub status: Option<DocumentStatus>,
}

impl DocumentFilter {
    pub fn matches(&self, d: &DocumentRecord) -> bool {
        self.kind.is_none_or(|k| d.kind == k) && self.status.is_none_or(|s| d.status == s)
    }
}

/// Sum and count of the movements recorded against one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementTotals {
    pub sum: i64,
    pub count: u64,
}

/// Transactional persistence boundary.
///
/// ## Design
///
/// - **Synchronous**: domain code stays free of async; the Postgres backend
///   bridges onto the tokio runtime internally.
/// - **One transaction per operation**: every mutating service call does all of
///   its reads and writes through a single [`StoreTx`] and commits once.
/// - **Tenant isolation**: every read takes a `TenantId`; rows of other tenants
///   are invisible, never an error.
pub trait Store: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls back.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

impl<S> Store for std::sync::Arc<S>
where
    S: Store + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin()
    }
}

/// One open store transaction.
///
/// Implementations must:
/// - enforce per-tenant uniqueness (SKU, barcode, codes, category name,
///   document number per kind) and report violations as `Conflict`
/// - lock an inventory level from `lock_level` until commit or rollback
/// - lock a document from `load_document` until commit or rollback
/// - reject `update_document` when the stored version differs from
///   `expected_version`
pub trait StoreTx {
    /// Identifier stamped on every movement written by this transaction.
    fn transaction_id(&self) -> Uuid;

    fn item(&mut self, tenant_id: TenantId, id: ItemId) -> Result<Option<Item>, StoreError>;
    fn put_item(&mut self, item: &Item) -> Result<(), StoreError>;
    fn items(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Item>, StoreError>;

    fn location(&mut self, tenant_id: TenantId, id: LocationId) -> Result<Option<Location>, StoreError>;
    fn put_location(&mut self, location: &Location) -> Result<(), StoreError>;
    fn locations(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Location>, StoreError>;

    fn supplier(&mut self, tenant_id: TenantId, id: SupplierId) -> Result<Option<Supplier>, StoreError>;
    fn put_supplier(&mut self, supplier: &Supplier) -> Result<(), StoreError>;

    fn category(&mut self, tenant_id: TenantId, id: CategoryId) -> Result<Option<Category>, StoreError>;
    fn put_category(&mut self, category: &Category) -> Result<(), StoreError>;

    /// Read a level without locking it.
    fn level(&mut self, key: LevelKey) -> Result<Option<InventoryLevel>, StoreError>;
    /// Lock the level row, creating it at zero if absent.
    fn lock_level(&mut self, key: LevelKey) -> Result<InventoryLevel, StoreError>;
    fn save_level(&mut self, level: &InventoryLevel) -> Result<(), StoreError>;
    fn levels(
        &mut self,
        tenant_id: TenantId,
        filter: &LevelFilter,
        page: PageRequest,
    ) -> Result<Page<InventoryLevel>, StoreError>;

    fn append_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;
    fn movements(
        &mut self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError>;
    fn movement_totals(&mut self, tenant_id: TenantId) -> Result<HashMap<LevelKey, MovementTotals>, StoreError>;

    /// Read a document of `kind` without locking it.
    fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError>;
    /// Load and lock a document of `kind`.
    fn load_document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError>;
    fn insert_document(&mut self, doc: &DocumentRecord) -> Result<(), StoreError>;
    fn update_document(&mut self, doc: &DocumentRecord, expected_version: u64) -> Result<(), StoreError>;
    fn documents(
        &mut self,
        tenant_id: TenantId,
        filter: &DocumentFilter,
        page: PageRequest,
    ) -> Result<Page<DocumentRecord>, StoreError>;

    fn append_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError>;
    fn audit_log(
        &mut self,
        tenant_id: TenantId,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
