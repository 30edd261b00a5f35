//! Catalog maintenance: items, locations, suppliers, categories.
//!
//! Reference data never moves stock, so nothing here is published on the bus;
//! every mutation still leaves an audit record.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use stockledger_catalog::{Category, CategoryId, Item, ItemId, Location, LocationId, NewItem, Supplier, SupplierId};
use stockledger_core::{DomainError, Page, PageRequest, RequestContext};
use stockledger_events::{AuditAction, AuditRecord};

use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

fn record<T: Serialize>(
    ctx: &RequestContext,
    entity: &str,
    entity_id: impl ToString,
    action: AuditAction,
    before: Option<&T>,
    after: &T,
) -> ServiceResult<AuditRecord> {
    Ok(AuditRecord::new(
        ctx.tenant_id(),
        entity,
        entity_id,
        action,
        before.map(serde_json::to_value).transpose()?,
        Some(serde_json::to_value(after)?),
        ctx.user_id(),
        Utc::now(),
    ))
}

fn load_item(tx: &mut (dyn StoreTx + '_), ctx: &RequestContext, id: ItemId) -> ServiceResult<Item> {
    Ok(tx
        .item(ctx.tenant_id(), id)?
        .ok_or_else(|| DomainError::not_found(format!("item {id}")))?)
}

fn load_location(tx: &mut (dyn StoreTx + '_), ctx: &RequestContext, id: LocationId) -> ServiceResult<Location> {
    Ok(tx
        .location(ctx.tenant_id(), id)?
        .ok_or_else(|| DomainError::not_found(format!("location {id}")))?)
}

#[derive(Debug)]
pub struct CatalogService<S> {
    store: S,
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// SKU and barcode must be unique within the tenant.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %ctx.tenant_id(), sku = %input.sku), err)]
    pub fn create_item(&self, ctx: &RequestContext, input: NewItem) -> ServiceResult<Item> {
        let item = Item::new(ctx.tenant_id(), ItemId::generate(), input, Utc::now())?;
        let mut tx = self.store.begin()?;
        if let Some(category_id) = item.category_id {
            tx.category(ctx.tenant_id(), category_id)?
                .ok_or_else(|| DomainError::not_found(format!("category {category_id}")))?;
        }
        tx.put_item(&item)?;
        tx.append_audit(&record(ctx, "item", item.id, AuditAction::Create, None, &item)?)?;
        tx.commit()?;
        info!(item_id = %item.id, "item created");
        Ok(item)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn reprice_item(&self, ctx: &RequestContext, id: ItemId, cost: i64, price: i64) -> ServiceResult<Item> {
        self.update_item(ctx, id, |item| item.reprice(cost, price, Utc::now()))
    }

    /// Inactive items stay movable; the ledger only logs a warning.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn deactivate_item(&self, ctx: &RequestContext, id: ItemId) -> ServiceResult<Item> {
        self.update_item(ctx, id, |item| {
            item.deactivate(Utc::now());
            Ok(())
        })
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn reactivate_item(&self, ctx: &RequestContext, id: ItemId) -> ServiceResult<Item> {
        self.update_item(ctx, id, |item| item.reactivate(Utc::now()))
    }

    /// Soft delete. Items are never physically removed.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn delete_item(&self, ctx: &RequestContext, id: ItemId) -> ServiceResult<Item> {
        self.update_item(ctx, id, |item| {
            item.soft_delete(Utc::now());
            Ok(())
        })
    }

    fn update_item(
        &self,
        ctx: &RequestContext,
        id: ItemId,
        change: impl FnOnce(&mut Item) -> stockledger_core::DomainResult<()>,
    ) -> ServiceResult<Item> {
        let mut tx = self.store.begin()?;
        let mut item = load_item(tx.as_mut(), ctx, id)?;
        let before = item.clone();
        change(&mut item)?;
        tx.put_item(&item)?;
        tx.append_audit(&record(ctx, "item", item.id, AuditAction::Update, Some(&before), &item)?)?;
        tx.commit()?;
        Ok(item)
    }

    pub fn item(&self, ctx: &RequestContext, id: ItemId) -> ServiceResult<Item> {
        let mut tx = self.store.begin()?;
        load_item(tx.as_mut(), ctx, id)
    }

    pub fn items(&self, ctx: &RequestContext, page: PageRequest) -> ServiceResult<Page<Item>> {
        let mut tx = self.store.begin()?;
        Ok(tx.items(ctx.tenant_id(), page)?)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create_location(&self, ctx: &RequestContext, code: &str, name: &str) -> ServiceResult<Location> {
        let location = Location::new(ctx.tenant_id(), LocationId::generate(), code, name)?;
        let mut tx = self.store.begin()?;
        tx.put_location(&location)?;
        tx.append_audit(&record(ctx, "location", location.id, AuditAction::Create, None, &location)?)?;
        tx.commit()?;
        info!(location_id = %location.id, code = %location.code, "location created");
        Ok(location)
    }

    /// Sets the active flag. Inactive locations reject every movement.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn set_location_active(&self, ctx: &RequestContext, id: LocationId, active: bool) -> ServiceResult<Location> {
        let mut tx = self.store.begin()?;
        let mut location = load_location(tx.as_mut(), ctx, id)?;
        let before = location.clone();
        if active {
            location.reactivate();
        } else {
            location.deactivate();
        }
        tx.put_location(&location)?;
        tx.append_audit(&record(ctx, "location", location.id, AuditAction::Update, Some(&before), &location)?)?;
        tx.commit()?;
        Ok(location)
    }

    pub fn locations(&self, ctx: &RequestContext, page: PageRequest) -> ServiceResult<Page<Location>> {
        let mut tx = self.store.begin()?;
        Ok(tx.locations(ctx.tenant_id(), page)?)
    }

    #[instrument(skip(self, ctx, email), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create_supplier(
        &self,
        ctx: &RequestContext,
        code: &str,
        name: &str,
        email: Option<String>,
    ) -> ServiceResult<Supplier> {
        let supplier = Supplier::new(ctx.tenant_id(), SupplierId::generate(), code, name, email)?;
        let mut tx = self.store.begin()?;
        tx.put_supplier(&supplier)?;
        tx.append_audit(&record(ctx, "supplier", supplier.id, AuditAction::Create, None, &supplier)?)?;
        tx.commit()?;
        Ok(supplier)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create_category(
        &self,
        ctx: &RequestContext,
        name: &str,
        parent_id: Option<CategoryId>,
    ) -> ServiceResult<Category> {
        let category = Category::new(ctx.tenant_id(), CategoryId::generate(), name, parent_id)?;
        let mut tx = self.store.begin()?;
        if let Some(parent) = parent_id {
            tx.category(ctx.tenant_id(), parent)?
                .ok_or_else(|| DomainError::not_found(format!("category {parent}")))?;
        }
        tx.put_category(&category)?;
        tx.append_audit(&record(ctx, "category", category.id, AuditAction::Create, None, &category)?)?;
        tx.commit()?;
        Ok(category)
    }
}
