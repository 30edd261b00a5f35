//! Ledger service: the one place stock moves.
//!
//! [`post_movement`] is shared by the manual ledger contract and by every
//! workflow transition, so the preconditions (catalog resolution, active
//! location, non-negative on-hand) are enforced identically everywhere.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::paging::MAX_PAGE_LIMIT;
use stockledger_core::{Aggregate, AggregateRoot, DomainError, Page, PageRequest, RequestContext, TenantId};
use stockledger_events::{AuditAction, AuditRecord, EventBus, EventEnvelope};
use stockledger_ledger::{
    Discrepancy, InventoryLevel, LedgerCommand, LevelKey, MoveStock, MovementReason, MovementReference,
    StockMovement,
};

use crate::error::ServiceResult;
use crate::outbox::Outbox;
use crate::store::{LevelFilter, Store, StoreTx};

pub(crate) const LEVEL_ENTITY: &str = "inventory_level";

/// Input of [`LedgerService::apply_movement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub item_id: ItemId,
    pub location_id: LocationId,
    /// Signed; never zero.
    pub quantity: i64,
    pub reason: MovementReason,
    pub reference: MovementReference,
}

/// The committed movement and the level it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementResult {
    pub movement: StockMovement,
    pub level: InventoryLevel,
}

impl MovementResult {
    pub fn on_hand(&self) -> i64 {
        self.level.on_hand()
    }

    pub fn available(&self) -> i64 {
        self.level.available()
    }
}

/// A movement applied inside an open transaction.
pub(crate) struct Posted {
    /// The level as read under its row lock, before the movement.
    pub prior: InventoryLevel,
    pub result: MovementResult,
}

/// Apply one movement inside an open transaction.
///
/// Locks (or lazily creates) the level row, so callers touching several
/// levels must do so in `LevelKey` order.
pub(crate) fn post_movement(
    tx: &mut (dyn StoreTx + '_),
    ctx: &RequestContext,
    request: &MovementRequest,
    now: DateTime<Utc>,
) -> ServiceResult<Posted> {
    let tenant_id = ctx.tenant_id();
    if request.quantity == 0 {
        return Err(DomainError::validation("movement quantity cannot be zero").into());
    }

    let item = tx
        .item(tenant_id, request.item_id)?
        .ok_or_else(|| DomainError::not_found(format!("item {}", request.item_id)))?;
    if !item.is_usable() {
        warn!(%tenant_id, item_id = %item.id, sku = %item.sku, "moving stock of an inactive item");
    }

    let location = tx
        .location(tenant_id, request.location_id)?
        .ok_or_else(|| DomainError::not_found(format!("location {}", request.location_id)))?;
    if !location.active {
        return Err(DomainError::validation(format!("location {} is inactive", location.code)).into());
    }

    let key = LevelKey::new(tenant_id, request.item_id, request.location_id);
    let prior = tx.lock_level(key)?;
    let mut level = prior.clone();
    let command = LedgerCommand::MoveStock(MoveStock {
        tenant_id,
        movement_id: Uuid::now_v7(),
        quantity: request.quantity,
        reason: request.reason,
        reference: request.reference.clone(),
        transaction_id: tx.transaction_id(),
        actor: ctx.user_id(),
        occurred_at: now,
    });
    let events = level.handle(&command)?;

    let mut movement = None;
    for event in &events {
        level.apply(event);
        tx.append_movement(event.movement())?;
        movement = Some(event.movement().clone());
    }
    tx.save_level(&level)?;

    let movement = movement
        .ok_or_else(|| DomainError::validation("movement produced no ledger entry"))?;
    Ok(Posted {
        prior,
        result: MovementResult { movement, level },
    })
}

/// Every level of a tenant matching `filter`, across pages.
pub(crate) fn all_levels(
    tx: &mut (dyn StoreTx + '_),
    tenant_id: TenantId,
    filter: &LevelFilter,
) -> ServiceResult<Vec<InventoryLevel>> {
    let mut page = PageRequest::new(Some(MAX_PAGE_LIMIT), Some(0));
    let mut levels = Vec::new();
    loop {
        let chunk = tx.levels(tenant_id, filter, page)?;
        let has_more = chunk.has_more;
        levels.extend(chunk.items);
        if !has_more {
            return Ok(levels);
        }
        page.offset += page.limit;
    }
}

fn level_entity_id(key: &LevelKey) -> String {
    format!("{}:{}", key.item_id, key.location_id)
}

fn snapshot(level: &InventoryLevel) -> ServiceResult<JsonValue> {
    Ok(serde_json::to_value(level)?)
}

/// Direct ledger contract plus reorder policy and consistency checks.
#[derive(Debug)]
pub struct LedgerService<S, B> {
    store: S,
    bus: B,
}

impl<S, B> LedgerService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> LedgerService<S, B>
where
    S: Store,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Move stock outside of any document (manual correction).
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id(), item_id = %request.item_id, location_id = %request.location_id, quantity = request.quantity),
        err
    )]
    pub fn apply_movement(&self, ctx: &RequestContext, request: MovementRequest) -> ServiceResult<MovementResult> {
        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();

        let Posted { prior, result } = post_movement(tx.as_mut(), ctx, &request, now)?;
        tx.append_audit(&AuditRecord::new(
            ctx.tenant_id(),
            LEVEL_ENTITY,
            level_entity_id(&result.level.key()),
            AuditAction::Update,
            Some(snapshot(&prior)?),
            Some(snapshot(&result.level)?),
            ctx.user_id(),
            now,
        ))?;
        outbox.movement(&result.movement, result.level.version())?;
        tx.commit()?;

        info!(
            reason = %result.movement.reason,
            on_hand = result.level.on_hand(),
            "stock movement committed"
        );
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(result)
    }

    /// Update reorder settings; creates the level at zero if absent.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn set_reorder_policy(
        &self,
        ctx: &RequestContext,
        item_id: ItemId,
        location_id: LocationId,
        reorder_point: i64,
        reorder_qty: i64,
    ) -> ServiceResult<InventoryLevel> {
        let tenant_id = ctx.tenant_id();
        let mut tx = self.store.begin()?;
        tx.item(tenant_id, item_id)?
            .ok_or_else(|| DomainError::not_found(format!("item {item_id}")))?;
        tx.location(tenant_id, location_id)?
            .ok_or_else(|| DomainError::not_found(format!("location {location_id}")))?;

        let mut level = tx.lock_level(LevelKey::new(tenant_id, item_id, location_id))?;
        let before = snapshot(&level)?;
        level.set_reorder_policy(reorder_point, reorder_qty)?;
        tx.save_level(&level)?;
        tx.append_audit(&AuditRecord::new(
            tenant_id,
            LEVEL_ENTITY,
            level_entity_id(&level.key()),
            AuditAction::Update,
            Some(before),
            Some(snapshot(&level)?),
            ctx.user_id(),
            Utc::now(),
        ))?;
        tx.commit()?;
        Ok(level)
    }

    /// Levels whose available stock is at or below their reorder point.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn reorder_candidates(&self, ctx: &RequestContext, page: PageRequest) -> ServiceResult<Page<InventoryLevel>> {
        let mut tx = self.store.begin()?;
        let filter = LevelFilter {
            needs_reorder: true,
            ..LevelFilter::default()
        };
        Ok(tx.levels(ctx.tenant_id(), &filter, page)?)
    }

    /// Compare every level of the tenant with the sum and count of its
    /// movements. An empty result means the ledger is consistent.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn verify(&self, ctx: &RequestContext) -> ServiceResult<Vec<Discrepancy>> {
        let tenant_id = ctx.tenant_id();
        let mut tx = self.store.begin()?;
        let levels = all_levels(tx.as_mut(), tenant_id, &LevelFilter::default())?;
        let mut totals = tx.movement_totals(tenant_id)?;

        let mut discrepancies = Vec::new();
        for level in levels {
            let key = level.key();
            let t = totals.remove(&key).unwrap_or_default();
            if t.sum != level.on_hand() || t.count != level.version() {
                discrepancies.push(Discrepancy {
                    key,
                    on_hand: level.on_hand(),
                    movement_sum: t.sum,
                    version: level.version(),
                    movement_count: t.count,
                });
            }
        }
        // Movements whose level row is missing entirely.
        for (key, t) in totals {
            discrepancies.push(Discrepancy {
                key,
                on_hand: 0,
                movement_sum: t.sum,
                version: 0,
                movement_count: t.count,
            });
        }
        discrepancies.sort_by_key(|d| d.key);

        if !discrepancies.is_empty() {
            warn!(count = discrepancies.len(), "ledger discrepancies found");
        }
        Ok(discrepancies)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use stockledger_catalog::{Item, Location, NewItem};
    use stockledger_core::{Role, UserId};
    use stockledger_events::InMemoryEventBus;

    use super::*;
    use crate::store::InMemoryStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    struct Fixture {
        store: Arc<InMemoryStore>,
        bus: Bus,
        ledger: LedgerService<Arc<InMemoryStore>, Bus>,
        ctx: RequestContext,
        item: ItemId,
        location: LocationId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let ctx = RequestContext::new(TenantId::new(), UserId::new(), Role::Clerk);
        let item = ItemId::generate();
        let location = LocationId::generate();

        let mut tx = store.begin().unwrap();
        tx.put_item(
            &Item::new(
                ctx.tenant_id(),
                item,
                NewItem {
                    sku: "SKU-1".into(),
                    barcode: None,
                    name: "Widget".into(),
                    category_id: None,
                    unit_of_measure: "ea".into(),
                    cost: 100,
                    price: 250,
                },
                Utc::now(),
            )
            .unwrap(),
        )
        .unwrap();
        tx.put_location(&Location::new(ctx.tenant_id(), location, "MAIN", "Main").unwrap())
            .unwrap();
        tx.commit().unwrap();

        Fixture {
            ledger: LedgerService::new(store.clone(), bus.clone()),
            store,
            bus,
            ctx,
            item,
            location,
        }
    }

    fn request(f: &Fixture, quantity: i64) -> MovementRequest {
        MovementRequest {
            item_id: f.item,
            location_id: f.location,
            quantity,
            reason: MovementReason::Adjustment,
            reference: MovementReference::manual("test"),
        }
    }

    #[test]
    fn movement_updates_level_and_publishes_after_commit() {
        let f = fixture();
        let sub = f.bus.subscribe();

        let result = f.ledger.apply_movement(&f.ctx, request(&f, 5)).unwrap();
        assert_eq!(result.on_hand(), 5);
        assert_eq!(result.movement.on_hand_after, 5);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "ledger.stock.moved");
        assert_eq!(published[0].sequence_number(), 1);
        assert!(f.ledger.verify(&f.ctx).unwrap().is_empty());
    }

    #[test]
    fn insufficient_stock_leaves_nothing_behind() {
        let f = fixture();
        let err = f.ledger.apply_movement(&f.ctx, request(&f, -1)).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");

        let mut tx = f.store.begin().unwrap();
        let key = LevelKey::new(f.ctx.tenant_id(), f.item, f.location);
        assert!(tx.level(key).unwrap().is_none());
        let audit = tx
            .audit_log(f.ctx.tenant_id(), &Default::default(), PageRequest::default())
            .unwrap();
        assert_eq!(audit.total, 0);
    }

    #[test]
    fn audit_before_image_is_the_locked_level() {
        let f = fixture();
        f.ledger.apply_movement(&f.ctx, request(&f, 5)).unwrap();
        f.ledger.apply_movement(&f.ctx, request(&f, 3)).unwrap();

        let mut tx = f.store.begin().unwrap();
        let audit = tx
            .audit_log(f.ctx.tenant_id(), &Default::default(), PageRequest::default())
            .unwrap();
        assert_eq!(audit.total, 2);
        let second = audit
            .items
            .iter()
            .find(|r| r.after.as_ref().is_some_and(|a| a["on_hand"] == 8))
            .unwrap();
        let before = second.before.as_ref().unwrap();
        assert_eq!(before["on_hand"], 5);
        assert_eq!(before["version"], 1);

        let first = audit.items.iter().find(|r| r.id != second.id).unwrap();
        assert_eq!(first.before.as_ref().unwrap()["on_hand"], 0);
    }

    #[test]
    fn zero_quantity_is_a_validation_error() {
        let f = fixture();
        let err = f.ledger.apply_movement(&f.ctx, request(&f, 0)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn out_of_range_quantity_is_rejected_and_the_ledger_keeps_working() {
        let f = fixture();
        let err = f.ledger.apply_movement(&f.ctx, request(&f, i64::MIN)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        assert_eq!(f.ledger.apply_movement(&f.ctx, request(&f, 5)).unwrap().on_hand(), 5);
        assert!(f.ledger.verify(&f.ctx).unwrap().is_empty());
    }

    #[test]
    fn inactive_location_is_rejected() {
        let f = fixture();
        let mut tx = f.store.begin().unwrap();
        let mut location = tx.location(f.ctx.tenant_id(), f.location).unwrap().unwrap();
        location.deactivate();
        tx.put_location(&location).unwrap();
        tx.commit().unwrap();

        let err = f.ledger.apply_movement(&f.ctx, request(&f, 3)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn inactive_item_is_only_advisory() {
        let f = fixture();
        let mut tx = f.store.begin().unwrap();
        let mut item = tx.item(f.ctx.tenant_id(), f.item).unwrap().unwrap();
        item.deactivate(Utc::now());
        tx.put_item(&item).unwrap();
        tx.commit().unwrap();

        assert_eq!(f.ledger.apply_movement(&f.ctx, request(&f, 3)).unwrap().on_hand(), 3);
    }

    #[test]
    fn other_tenants_catalog_is_not_found() {
        let f = fixture();
        let stranger = RequestContext::new(TenantId::new(), UserId::new(), Role::Admin);
        let err = f.ledger.apply_movement(&stranger, request(&f, 3)).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn reorder_policy_drives_candidates() {
        let f = fixture();
        f.ledger.apply_movement(&f.ctx, request(&f, 4)).unwrap();
        let level = f
            .ledger
            .set_reorder_policy(&f.ctx, f.item, f.location, 5, 20)
            .unwrap();
        assert_eq!(level.reorder_point(), 5);
        assert_eq!(level.on_hand(), 4);

        let page = f.ledger.reorder_candidates(&f.ctx, PageRequest::default()).unwrap();
        assert_eq!(page.items.len(), 1);

        f.ledger.apply_movement(&f.ctx, request(&f, 10)).unwrap();
        let page = f.ledger.reorder_candidates(&f.ctx, PageRequest::default()).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn negative_reorder_policy_is_rejected() {
        let f = fixture();
        let err = f
            .ledger
            .set_reorder_policy(&f.ctx, f.item, f.location, -1, 0)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
