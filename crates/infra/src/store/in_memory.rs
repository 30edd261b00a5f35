use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use stockledger_catalog::{Category, CategoryId, Item, ItemId, Location, LocationId, Supplier, SupplierId};
use stockledger_core::{Entity, Page, PageRequest, TenantId};
use stockledger_events::AuditRecord;
use stockledger_ledger::{InventoryLevel, LevelKey, StockMovement};
use stockledger_workflows::{DocumentId, DocumentKind};

use super::r#trait::{
    AuditFilter, DocumentFilter, DocumentRecord, LevelFilter, MovementFilter, MovementTotals, Store,
    StoreError, StoreTx,
};

/// Every table of the store. Used both for committed state and for the
/// writes staged by an open transaction.
#[derive(Debug, Default)]
struct Tables {
    items: HashMap<(TenantId, ItemId), Item>,
    locations: HashMap<(TenantId, LocationId), Location>,
    suppliers: HashMap<(TenantId, SupplierId), Supplier>,
    categories: HashMap<(TenantId, CategoryId), Category>,
    levels: HashMap<LevelKey, InventoryLevel>,
    documents: HashMap<(TenantId, DocumentId), DocumentRecord>,
    movements: Vec<StockMovement>,
    audit: Vec<AuditRecord>,
}

impl Tables {
    fn absorb(&mut self, staged: Tables) {
        self.items.extend(staged.items);
        self.locations.extend(staged.locations);
        self.suppliers.extend(staged.suppliers);
        self.categories.extend(staged.categories);
        self.levels.extend(staged.levels);
        self.documents.extend(staged.documents);
        self.movements.extend(staged.movements);
        self.audit.extend(staged.audit);
    }
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Transactions are serialized behind one mutex, so
/// every lock the trait promises is trivially held. Writes are staged and
/// only merged into the committed tables on `commit`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    committed: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        // Writes are staged until commit, so a transaction that panicked
        // never left the committed tables half-updated.
        let committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Box::new(InMemoryTx {
            id: Uuid::now_v7(),
            committed,
            staged: Tables::default(),
        }))
    }
}

struct InMemoryTx<'a> {
    id: Uuid,
    committed: MutexGuard<'a, Tables>,
    staged: Tables,
}

fn lookup<K: Eq + Hash, V: Clone>(base: &HashMap<K, V>, staged: &HashMap<K, V>, key: &K) -> Option<V> {
    staged.get(key).or_else(|| base.get(key)).cloned()
}

/// Staged rows shadow committed rows with the same key.
fn merged<'a, K: Eq + Hash, V>(
    base: &'a HashMap<K, V>,
    staged: &'a HashMap<K, V>,
) -> impl Iterator<Item = &'a V> + 'a {
    staged
        .values()
        .chain(base.iter().filter(move |(k, _)| !staged.contains_key(*k)).map(|(_, v)| v))
}

fn ensure_unique<'a, V: 'a>(
    mut rows: impl Iterator<Item = &'a V>,
    clash: impl Fn(&V) -> bool,
    what: impl FnOnce() -> String,
) -> Result<(), StoreError> {
    if rows.any(|v| clash(v)) {
        return Err(StoreError::Conflict(what()));
    }
    Ok(())
}

type CatalogTable<E> = HashMap<(TenantId, <E as Entity>::Id), E>;

/// Upsert a catalog row; `clash` is checked against the tenant's other rows.
fn put_unique<E: Entity + Clone>(
    base: &CatalogTable<E>,
    staged: &mut CatalogTable<E>,
    row: &E,
    clash: impl Fn(&E) -> bool,
    what: impl FnOnce() -> String,
) -> Result<(), StoreError> {
    let others = merged(base, staged).filter(|o| o.tenant_id() == row.tenant_id() && o.id() != row.id());
    ensure_unique(others, clash, what)?;
    staged.insert((row.tenant_id(), row.id().clone()), row.clone());
    Ok(())
}

fn tenant_rows<E: Entity + Clone>(base: &CatalogTable<E>, staged: &CatalogTable<E>, tenant_id: TenantId) -> Vec<E> {
    merged(base, staged)
        .filter(|row| row.tenant_id() == tenant_id)
        .cloned()
        .collect()
}

impl StoreTx for InMemoryTx<'_> {
    fn transaction_id(&self) -> Uuid {
        self.id
    }

    fn item(&mut self, tenant_id: TenantId, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(lookup(&self.committed.items, &self.staged.items, &(tenant_id, id)))
    }

    fn put_item(&mut self, item: &Item) -> Result<(), StoreError> {
        put_unique(
            &self.committed.items,
            &mut self.staged.items,
            item,
            |i| i.sku == item.sku || (item.barcode.is_some() && i.barcode == item.barcode),
            || format!("item with sku {} or the same barcode already exists", item.sku),
        )
    }

    fn items(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Item>, StoreError> {
        let mut rows = tenant_rows(&self.committed.items, &self.staged.items, tenant_id);
        rows.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(page.slice(rows))
    }

    fn location(&mut self, tenant_id: TenantId, id: LocationId) -> Result<Option<Location>, StoreError> {
        Ok(lookup(&self.committed.locations, &self.staged.locations, &(tenant_id, id)))
    }

    fn put_location(&mut self, location: &Location) -> Result<(), StoreError> {
        put_unique(
            &self.committed.locations,
            &mut self.staged.locations,
            location,
            |l| l.code == location.code,
            || format!("location code {} already exists", location.code),
        )
    }

    fn locations(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Location>, StoreError> {
        let mut rows = tenant_rows(&self.committed.locations, &self.staged.locations, tenant_id);
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(page.slice(rows))
    }

    fn supplier(&mut self, tenant_id: TenantId, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        Ok(lookup(&self.committed.suppliers, &self.staged.suppliers, &(tenant_id, id)))
    }

    fn put_supplier(&mut self, supplier: &Supplier) -> Result<(), StoreError> {
        put_unique(
            &self.committed.suppliers,
            &mut self.staged.suppliers,
            supplier,
            |s| s.code == supplier.code,
            || format!("supplier code {} already exists", supplier.code),
        )
    }

    fn category(&mut self, tenant_id: TenantId, id: CategoryId) -> Result<Option<Category>, StoreError> {
        Ok(lookup(&self.committed.categories, &self.staged.categories, &(tenant_id, id)))
    }

    fn put_category(&mut self, category: &Category) -> Result<(), StoreError> {
        put_unique(
            &self.committed.categories,
            &mut self.staged.categories,
            category,
            |c| c.name.eq_ignore_ascii_case(&category.name),
            || format!("category {} already exists", category.name),
        )
    }

    fn level(&mut self, key: LevelKey) -> Result<Option<InventoryLevel>, StoreError> {
        Ok(lookup(&self.committed.levels, &self.staged.levels, &key))
    }

    fn lock_level(&mut self, key: LevelKey) -> Result<InventoryLevel, StoreError> {
        let level = lookup(&self.committed.levels, &self.staged.levels, &key)
            .unwrap_or_else(|| InventoryLevel::empty(key));
        self.staged.levels.entry(key).or_insert_with(|| level.clone());
        Ok(level)
    }

    fn save_level(&mut self, level: &InventoryLevel) -> Result<(), StoreError> {
        self.staged.levels.insert(level.key(), level.clone());
        Ok(())
    }

    fn levels(
        &mut self,
        tenant_id: TenantId,
        filter: &LevelFilter,
        page: PageRequest,
    ) -> Result<Page<InventoryLevel>, StoreError> {
        let mut rows: Vec<InventoryLevel> = merged(&self.committed.levels, &self.staged.levels)
            .filter(|l| l.key().tenant_id == tenant_id && filter.matches(l))
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.key());
        Ok(page.slice(rows))
    }

    fn append_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.staged.movements.push(movement.clone());
        Ok(())
    }

    fn movements(
        &mut self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError> {
        let rows: Vec<StockMovement> = self
            .committed
            .movements
            .iter()
            .chain(self.staged.movements.iter())
            .filter(|m| m.tenant_id == tenant_id && filter.matches(m))
            .cloned()
            .collect();
        Ok(page.slice(rows))
    }

    fn movement_totals(&mut self, tenant_id: TenantId) -> Result<HashMap<LevelKey, MovementTotals>, StoreError> {
        let mut totals: HashMap<LevelKey, MovementTotals> = HashMap::new();
        for m in self
            .committed
            .movements
            .iter()
            .chain(self.staged.movements.iter())
            .filter(|m| m.tenant_id == tenant_id)
        {
            let t = totals
                .entry(LevelKey::new(m.tenant_id, m.item_id, m.location_id))
                .or_default();
            t.sum += m.quantity;
            t.count += 1;
        }
        Ok(totals)
    }

    fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(lookup(&self.committed.documents, &self.staged.documents, &(tenant_id, id))
            .filter(|d| d.kind == kind))
    }

    // The whole transaction already holds the store lock.
    fn load_document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        self.document(tenant_id, kind, id)
    }

    fn insert_document(&mut self, doc: &DocumentRecord) -> Result<(), StoreError> {
        let key = (doc.tenant_id, doc.id);
        if self.committed.documents.contains_key(&key) || self.staged.documents.contains_key(&key) {
            return Err(StoreError::Conflict(format!("document {} already exists", doc.id)));
        }
        let others = merged(&self.committed.documents, &self.staged.documents)
            .filter(|d| d.tenant_id == doc.tenant_id && d.kind == doc.kind);
        ensure_unique(
            others,
            |d| d.number == doc.number,
            || format!("{} number {} already exists", doc.kind, doc.number),
        )?;
        self.staged.documents.insert(key, doc.clone());
        Ok(())
    }

    fn update_document(&mut self, doc: &DocumentRecord, expected_version: u64) -> Result<(), StoreError> {
        let key = (doc.tenant_id, doc.id);
        let current = lookup(&self.committed.documents, &self.staged.documents, &key)
            .ok_or_else(|| StoreError::Conflict(format!("document {} does not exist", doc.id)))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "document {} is at version {}, expected {}",
                doc.id, current.version, expected_version
            )));
        }
        self.staged.documents.insert(key, doc.clone());
        Ok(())
    }

    fn documents(
        &mut self,
        tenant_id: TenantId,
        filter: &DocumentFilter,
        page: PageRequest,
    ) -> Result<Page<DocumentRecord>, StoreError> {
        let mut rows: Vec<DocumentRecord> = merged(&self.committed.documents, &self.staged.documents)
            .filter(|d| d.tenant_id == tenant_id && filter.matches(d))
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.id);
        Ok(page.slice(rows))
    }

    fn append_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError> {
        self.staged.audit.push(record.clone());
        Ok(())
    }

    fn audit_log(
        &mut self,
        tenant_id: TenantId,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError> {
        let rows: Vec<AuditRecord> = self
            .committed
            .audit
            .iter()
            .chain(self.staged.audit.iter())
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r))
            .cloned()
            .collect();
        Ok(page.slice(rows))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx {
            mut committed,
            staged,
            ..
        } = *self;
        committed.absorb(staged);
        Ok(())
    }
}
