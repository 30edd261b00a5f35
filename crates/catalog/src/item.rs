use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, Money, TenantId, typed_id};

use crate::{normalize_code, required};

typed_id!(
    /// Item identifier (tenant-scoped via the owning record).
    ItemId
);

typed_id!(
    /// Category identifier.
    CategoryId
);

/// Item category (grouping only; no ledger semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub tenant_id: TenantId,
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl Category {
    pub fn new(
        tenant_id: TenantId,
        id: CategoryId,
        name: &str,
        parent_id: Option<CategoryId>,
    ) -> DomainResult<Self> {
        if parent_id == Some(id) {
            return Err(DomainError::validation("category cannot be its own parent"));
        }
        Ok(Self {
            id,
            tenant_id,
            name: required("category name", name)?,
            parent_id,
        })
    }
}

/// Input for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_of_measure: String,
    pub cost: i64,
    pub price: i64,
}

/// Catalog item.
///
/// Once referenced by a movement an item is never physically deleted; it is
/// deactivated or soft-deleted instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub sku: String,
    pub barcode: Option<String>,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_of_measure: String,
    pub cost: Money,
    pub price: Money,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(
        tenant_id: TenantId,
        id: ItemId,
        input: NewItem,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let barcode = match input.barcode.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(code) => Some(normalize_code("barcode", code)?),
        };
        let unit_of_measure = match input.unit_of_measure.trim() {
            "" => "ea".to_string(),
            uom => uom.to_lowercase(),
        };

        Ok(Self {
            id,
            tenant_id,
            sku: normalize_code("sku", &input.sku)?,
            barcode,
            name: required("name", &input.name)?,
            category_id: input.category_id,
            unit_of_measure,
            cost: Money::non_negative(input.cost)?,
            price: Money::non_negative(input.price)?,
            active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether new stock operations should normally target this item.
    ///
    /// Advisory only: corrections against deactivated items are allowed.
    pub fn is_usable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.deleted_at.is_some() {
            return Err(DomainError::conflict("cannot reactivate a deleted item"));
        }
        self.active = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.deleted_at.get_or_insert(now);
        self.updated_at = now;
    }

    pub fn reprice(&mut self, cost: i64, price: i64, now: DateTime<Utc>) -> DomainResult<()> {
        self.cost = Money::non_negative(cost)?;
        self.price = Money::non_negative(price)?;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
