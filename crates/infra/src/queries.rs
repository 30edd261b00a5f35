//! Read API. Every query is scoped to the caller's tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{AggregateRoot, DomainError, Page, PageRequest, RequestContext};
use stockledger_events::AuditRecord;
use stockledger_ledger::{InventoryLevel, LevelKey, StockMovement};
use stockledger_workflows::{DocumentId, Workflow};

use crate::config::InfraConfig;
use crate::error::ServiceResult;
use crate::store::{AuditFilter, DocumentFilter, DocumentRecord, LevelFilter, MovementFilter, Store};

/// Inventory level as returned to readers; `available` is computed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelView {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub on_hand: i64,
    pub allocated: i64,
    pub available: i64,
    pub reorder_point: i64,
    pub reorder_qty: i64,
    pub needs_reorder: bool,
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&InventoryLevel> for LevelView {
    fn from(level: &InventoryLevel) -> Self {
        let key = level.key();
        Self {
            item_id: key.item_id,
            location_id: key.location_id,
            on_hand: level.on_hand(),
            allocated: level.allocated(),
            available: level.available(),
            reorder_point: level.reorder_point(),
            reorder_qty: level.reorder_qty(),
            needs_reorder: level.needs_reorder(),
            version: level.version(),
            updated_at: level.updated_at(),
        }
    }
}

#[derive(Debug)]
pub struct Queries<S> {
    store: S,
    page_limit_max: u32,
}

impl<S: Store> Queries<S> {
    pub fn new(store: S, config: &InfraConfig) -> Self {
        Self {
            store,
            page_limit_max: config.page_limit_max,
        }
    }

    fn cap(&self, page: PageRequest) -> PageRequest {
        PageRequest {
            limit: page.limit.clamp(1, self.page_limit_max.max(1)),
            offset: page.offset,
        }
    }

    pub fn inventory_levels(
        &self,
        ctx: &RequestContext,
        filter: &LevelFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<LevelView>> {
        let mut tx = self.store.begin()?;
        let levels = tx.levels(ctx.tenant_id(), filter, self.cap(page))?;
        Ok(Page::new(
            levels.items.iter().map(LevelView::from).collect(),
            levels.total,
            levels.page,
        ))
    }

    /// One level; a key that never saw a movement reads as zero.
    pub fn inventory_level(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
        location_id: LocationId,
    ) -> ServiceResult<LevelView> {
        let key = LevelKey::new(ctx.tenant_id(), item_id, location_id);
        let mut tx = self.store.begin()?;
        let level = tx.level(key)?.unwrap_or_else(|| InventoryLevel::empty(key));
        Ok(LevelView::from(&level))
    }

    /// Movements in commit order.
    pub fn movements(
        &self,
        ctx: &RequestContext,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<StockMovement>> {
        let mut tx = self.store.begin()?;
        Ok(tx.movements(ctx.tenant_id(), filter, self.cap(page))?)
    }

    pub fn audit_log(
        &self,
        ctx: &RequestContext,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<AuditRecord>> {
        let mut tx = self.store.begin()?;
        Ok(tx.audit_log(ctx.tenant_id(), filter, self.cap(page))?)
    }

    pub fn document<W: Workflow>(&self, ctx: &RequestContext, id: DocumentId) -> ServiceResult<W> {
        let mut tx = self.store.begin()?;
        let record = tx
            .document(ctx.tenant_id(), W::KIND, id)?
            .ok_or_else(|| DomainError::not_found(format!("{} {id}", W::KIND)))?;
        Ok(record.decode()?)
    }

    /// Header columns plus the raw JSON body, for listings across kinds.
    pub fn documents(
        &self,
        ctx: &RequestContext,
        filter: &DocumentFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<DocumentRecord>> {
        let mut tx = self.store.begin()?;
        Ok(tx.documents(ctx.tenant_id(), filter, self.cap(page))?)
    }
}
