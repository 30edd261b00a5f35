//! Postgres-backed store implementation.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StoreError` | Scenario |
//! |------------|---------------|--------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | duplicate SKU, code or document number |
//! | Database (other) | any other | `Backend` | check violations, serialization failures |
//! | PoolClosed / Io / other | n/a | `Backend` | connection failures |
//!
//! ## Runtime bridge
//!
//! The [`Store`] boundary is synchronous. Every statement is driven with
//! `block_in_place` + `Handle::block_on`, so callers must run inside a
//! multi-threaded tokio runtime.

use std::collections::HashMap;
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use stockledger_catalog::{Category, CategoryId, Item, ItemId, Location, LocationId, Supplier, SupplierId};
use stockledger_core::{AggregateId, AggregateRoot, Page, PageRequest, TenantId, UserId};
use stockledger_events::{AuditAction, AuditRecord};
use stockledger_ledger::{InventoryLevel, LevelKey, MovementReason, MovementReference, StockMovement};
use stockledger_workflows::{DocumentId, DocumentKind, DocumentStatus};

use super::r#trait::{
    AuditFilter, DocumentFilter, DocumentRecord, LevelFilter, MovementFilter, MovementTotals, Store,
    StoreError, StoreTx,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Postgres-backed transactional store.
///
/// Row locks (`SELECT … FOR UPDATE`) give per-level and per-document
/// serialization; transactions touching disjoint levels proceed in parallel.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn runtime() -> Result<Handle, StoreError> {
    Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresStore requires a tokio runtime; call it from within a multi-threaded runtime"
                .to_string(),
        )
    })
}

impl Store for PostgresStore {
    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let handle = runtime()?;
        let tx = tokio::task::block_in_place(|| handle.block_on(self.pool.begin()))
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTx {
            id: Uuid::now_v7(),
            handle,
            tx,
        }))
    }
}

struct PostgresTx {
    id: Uuid,
    handle: Handle,
    tx: Transaction<'static, Postgres>,
}

impl PostgresTx {
    /// Drive one statement on this transaction's connection.
    fn run<'s, F, T>(&'s mut self, op: impl FnOnce(&'s mut PgConnection) -> F) -> T
    where
        F: Future<Output = T>,
    {
        let conn: &'s mut PgConnection = &mut self.tx;
        let handle = &self.handle;
        tokio::task::block_in_place(|| handle.block_on(op(conn)))
    }

    fn count(&mut self, what: &str, query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>) -> Result<u64, StoreError> {
        let row = self
            .run(|c| query.fetch_one(c))
            .map_err(|e| map_sqlx_error(what, e))?;
        let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error(what, e))?;
        Ok(total as u64)
    }

    fn get_body<T: DeserializeOwned>(&mut self, table: &str, tenant_id: TenantId, id: AggregateId) -> Result<Option<T>, StoreError> {
        let sql = format!("SELECT body FROM {table} WHERE tenant_id = $1 AND id = $2");
        let row = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(*id.as_uuid())
                    .fetch_optional(c)
            })
            .map_err(|e| map_sqlx_error(table, e))?;
        row.map(|r| decode_body(&r)).transpose()
    }

    fn select_document(
        &mut self,
        what: &str,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
        lock: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let sql = format!("{DOCUMENT_COLUMNS} FROM documents WHERE tenant_id = $1 AND id = $2 AND kind = $3{lock}");
        let row = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(*id.0.as_uuid())
                    .bind(kind.as_str())
                    .fetch_optional(c)
            })
            .map_err(|e| map_sqlx_error(what, e))?;
        row.map(|r| document_from_row(&r).map_err(|e| map_sqlx_error(what, e)))
            .transpose()
    }

    fn put_coded<T: Serialize>(
        &mut self,
        table: &str,
        tenant_id: TenantId,
        id: AggregateId,
        code: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let body = encode_body(value)?;
        let sql = format!(
            "INSERT INTO {table} (tenant_id, id, code, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (tenant_id, id) DO UPDATE SET code = EXCLUDED.code, body = EXCLUDED.body"
        );
        self.run(|c| {
            sqlx::query(&sql)
                .bind(raw(tenant_id))
                .bind(*id.as_uuid())
                .bind(code)
                .bind(body)
                .execute(c)
        })
        .map_err(|e| map_sqlx_error(table, e))?;
        Ok(())
    }

    fn list_bodies<T: DeserializeOwned>(
        &mut self,
        table: &str,
        order_by: &str,
        tenant_id: TenantId,
        page: PageRequest,
    ) -> Result<Page<T>, StoreError> {
        let count_sql = format!("SELECT COUNT(*) AS total FROM {table} WHERE tenant_id = $1");
        let total = self.count(table, sqlx::query(&count_sql).bind(raw(tenant_id)))?;
        let sql = format!(
            "SELECT body FROM {table} WHERE tenant_id = $1 ORDER BY {order_by} LIMIT $2 OFFSET $3"
        );
        let rows = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(i64::from(page.limit))
                    .bind(i64::from(page.offset))
                    .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error(table, e))?;
        let items = rows.iter().map(decode_body).collect::<Result<Vec<T>, _>>()?;
        Ok(Page::new(items, total, page))
    }
}

impl StoreTx for PostgresTx {
    fn transaction_id(&self) -> Uuid {
        self.id
    }

    fn item(&mut self, tenant_id: TenantId, id: ItemId) -> Result<Option<Item>, StoreError> {
        self.get_body("items", tenant_id, id.0)
    }

    fn put_item(&mut self, item: &Item) -> Result<(), StoreError> {
        let body = encode_body(item)?;
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO items (tenant_id, id, sku, barcode, body)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tenant_id, id) DO UPDATE SET
                    sku = EXCLUDED.sku,
                    barcode = EXCLUDED.barcode,
                    body = EXCLUDED.body
                "#,
            )
            .bind(raw(item.tenant_id))
            .bind(*item.id.0.as_uuid())
            .bind(&item.sku)
            .bind(item.barcode.as_deref())
            .bind(body)
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("put_item", e))?;
        Ok(())
    }

    fn items(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Item>, StoreError> {
        self.list_bodies("items", "sku", tenant_id, page)
    }

    fn location(&mut self, tenant_id: TenantId, id: LocationId) -> Result<Option<Location>, StoreError> {
        self.get_body("locations", tenant_id, id.0)
    }

    fn put_location(&mut self, location: &Location) -> Result<(), StoreError> {
        self.put_coded("locations", location.tenant_id, location.id.0, &location.code, location)
    }

    fn locations(&mut self, tenant_id: TenantId, page: PageRequest) -> Result<Page<Location>, StoreError> {
        self.list_bodies("locations", "code", tenant_id, page)
    }

    fn supplier(&mut self, tenant_id: TenantId, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        self.get_body("suppliers", tenant_id, id.0)
    }

    fn put_supplier(&mut self, supplier: &Supplier) -> Result<(), StoreError> {
        self.put_coded("suppliers", supplier.tenant_id, supplier.id.0, &supplier.code, supplier)
    }

    fn category(&mut self, tenant_id: TenantId, id: CategoryId) -> Result<Option<Category>, StoreError> {
        self.get_body("categories", tenant_id, id.0)
    }

    fn put_category(&mut self, category: &Category) -> Result<(), StoreError> {
        let code = category.name.to_lowercase();
        self.put_coded("categories", category.tenant_id, category.id.0, &code, category)
    }

    fn level(&mut self, key: LevelKey) -> Result<Option<InventoryLevel>, StoreError> {
        let row = self
            .run(|c| {
                sqlx::query(LEVEL_SELECT_BY_KEY)
                    .bind(raw(key.tenant_id))
                    .bind(*key.item_id.0.as_uuid())
                    .bind(*key.location_id.0.as_uuid())
                    .fetch_optional(c)
            })
            .map_err(|e| map_sqlx_error("level", e))?;
        row.map(|r| level_from_row(&r).map_err(|e| map_sqlx_error("level", e)))
            .transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %key.tenant_id, item_id = %key.item_id, location_id = %key.location_id), err)]
    fn lock_level(&mut self, key: LevelKey) -> Result<InventoryLevel, StoreError> {
        // Lazy creation: make sure the row exists, then lock it.
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO inventory_levels (tenant_id, item_id, location_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (tenant_id, item_id, location_id) DO NOTHING
                "#,
            )
            .bind(raw(key.tenant_id))
            .bind(*key.item_id.0.as_uuid())
            .bind(*key.location_id.0.as_uuid())
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("create_level", e))?;

        let sql = format!("{LEVEL_SELECT_BY_KEY} FOR UPDATE");
        let row = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(key.tenant_id))
                    .bind(*key.item_id.0.as_uuid())
                    .bind(*key.location_id.0.as_uuid())
                    .fetch_one(c)
            })
            .map_err(|e| map_sqlx_error("lock_level", e))?;
        level_from_row(&row).map_err(|e| map_sqlx_error("lock_level", e))
    }

    fn save_level(&mut self, level: &InventoryLevel) -> Result<(), StoreError> {
        let key = level.key();
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO inventory_levels (
                    tenant_id, item_id, location_id,
                    on_hand, allocated, reorder_point, reorder_qty, version, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (tenant_id, item_id, location_id) DO UPDATE SET
                    on_hand = EXCLUDED.on_hand,
                    allocated = EXCLUDED.allocated,
                    reorder_point = EXCLUDED.reorder_point,
                    reorder_qty = EXCLUDED.reorder_qty,
                    version = EXCLUDED.version,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(raw(key.tenant_id))
            .bind(*key.item_id.0.as_uuid())
            .bind(*key.location_id.0.as_uuid())
            .bind(level.on_hand())
            .bind(level.allocated())
            .bind(level.reorder_point())
            .bind(level.reorder_qty())
            .bind(level.version() as i64)
            .bind(level.updated_at())
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("save_level", e))?;
        Ok(())
    }

    fn levels(
        &mut self,
        tenant_id: TenantId,
        filter: &LevelFilter,
        page: PageRequest,
    ) -> Result<Page<InventoryLevel>, StoreError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR item_id = $2)
                AND ($3::uuid IS NULL OR location_id = $3)
                AND (NOT $4 OR (reorder_point > 0 AND on_hand - allocated <= reorder_point))
        "#;
        let item = filter.item_id.map(|i| *i.0.as_uuid());
        let location = filter.location_id.map(|l| *l.0.as_uuid());

        let count_sql = format!("SELECT COUNT(*) AS total FROM inventory_levels {WHERE}");
        let total = self.count(
            "count_levels",
            sqlx::query(&count_sql)
                .bind(raw(tenant_id))
                .bind(item)
                .bind(location)
                .bind(filter.needs_reorder),
        )?;

        let sql = format!(
            "{LEVEL_COLUMNS} FROM inventory_levels {WHERE} ORDER BY item_id, location_id LIMIT $5 OFFSET $6"
        );
        let rows = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(item)
                    .bind(location)
                    .bind(filter.needs_reorder)
                    .bind(i64::from(page.limit))
                    .bind(i64::from(page.offset))
                    .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error("levels", e))?;
        let items = rows
            .iter()
            .map(level_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("levels", e))?;
        Ok(Page::new(items, total, page))
    }

    fn append_movement(&mut self, m: &StockMovement) -> Result<(), StoreError> {
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, tenant_id, item_id, location_id, quantity, reason,
                    ref_kind, ref_number, ref_id, transaction_id, on_hand_after,
                    occurred_at, actor
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(m.id)
            .bind(raw(m.tenant_id))
            .bind(*m.item_id.0.as_uuid())
            .bind(*m.location_id.0.as_uuid())
            .bind(m.quantity)
            .bind(m.reason.as_str())
            .bind(&m.reference.kind)
            .bind(&m.reference.number)
            .bind(m.reference.ref_id.map(|id| *id.as_uuid()))
            .bind(m.transaction_id)
            .bind(m.on_hand_after)
            .bind(m.occurred_at)
            .bind(*m.actor.as_uuid())
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("append_movement", e))?;
        Ok(())
    }

    fn movements(
        &mut self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR item_id = $2)
                AND ($3::uuid IS NULL OR location_id = $3)
                AND ($4::text IS NULL OR reason = $4)
                AND ($5::uuid IS NULL OR ref_id = $5)
                AND ($6::timestamptz IS NULL OR occurred_at >= $6)
                AND ($7::timestamptz IS NULL OR occurred_at <= $7)
        "#;
        let item = filter.item_id.map(|i| *i.0.as_uuid());
        let location = filter.location_id.map(|l| *l.0.as_uuid());
        let reason = filter.reason.map(|r| r.as_str());
        let ref_id = filter.ref_id.map(|id| *id.as_uuid());

        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements {WHERE}");
        let total = self.count(
            "count_movements",
            sqlx::query(&count_sql)
                .bind(raw(tenant_id))
                .bind(item)
                .bind(location)
                .bind(reason)
                .bind(ref_id)
                .bind(filter.occurred_after)
                .bind(filter.occurred_before),
        )?;

        let sql = format!(
            r#"
            SELECT id, tenant_id, item_id, location_id, quantity, reason, ref_kind, ref_number,
                   ref_id, transaction_id, on_hand_after, occurred_at, actor
            FROM stock_movements {WHERE}
            ORDER BY seq ASC
            LIMIT $8 OFFSET $9
            "#
        );
        let rows = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(item)
                    .bind(location)
                    .bind(reason)
                    .bind(ref_id)
                    .bind(filter.occurred_after)
                    .bind(filter.occurred_before)
                    .bind(i64::from(page.limit))
                    .bind(i64::from(page.offset))
                    .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error("movements", e))?;
        let items = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("movements", e))?;
        Ok(Page::new(items, total, page))
    }

    fn movement_totals(&mut self, tenant_id: TenantId) -> Result<HashMap<LevelKey, MovementTotals>, StoreError> {
        let rows = self
            .run(|c| {
                sqlx::query(
                    r#"
                    SELECT item_id, location_id, SUM(quantity)::BIGINT AS sum, COUNT(*) AS count
                    FROM stock_movements
                    WHERE tenant_id = $1
                    GROUP BY item_id, location_id
                    "#,
                )
                .bind(raw(tenant_id))
                .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error("movement_totals", e))?;

        let mut totals = HashMap::with_capacity(rows.len());
        for row in rows {
            let decode = || -> Result<(LevelKey, MovementTotals), sqlx::Error> {
                let key = LevelKey::new(
                    tenant_id,
                    ItemId::new(AggregateId::from_uuid(row.try_get("item_id")?)),
                    LocationId::new(AggregateId::from_uuid(row.try_get("location_id")?)),
                );
                let sum: i64 = row.try_get("sum")?;
                let count: i64 = row.try_get("count")?;
                Ok((key, MovementTotals { sum, count: count as u64 }))
            };
            let (key, t) = decode().map_err(|e| map_sqlx_error("movement_totals", e))?;
            totals.insert(key, t);
        }
        Ok(totals)
    }

    fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        self.select_document("document", tenant_id, kind, id, "")
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, document_id = %id), err)]
    fn load_document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        self.select_document("load_document", tenant_id, kind, id, " FOR UPDATE")
    }

    fn insert_document(&mut self, doc: &DocumentRecord) -> Result<(), StoreError> {
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO documents (tenant_id, id, kind, number, status, version, updated_at, body)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(raw(doc.tenant_id))
            .bind(*doc.id.0.as_uuid())
            .bind(doc.kind.as_str())
            .bind(&doc.number)
            .bind(doc.status.as_str())
            .bind(doc.version as i64)
            .bind(doc.updated_at)
            .bind(&doc.body)
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    fn update_document(&mut self, doc: &DocumentRecord, expected_version: u64) -> Result<(), StoreError> {
        let result = self
            .run(|c| {
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET status = $4, version = $5, updated_at = $6, body = $7
                    WHERE tenant_id = $1 AND id = $2 AND version = $3
                    "#,
                )
                .bind(raw(doc.tenant_id))
                .bind(*doc.id.0.as_uuid())
                .bind(expected_version as i64)
                .bind(doc.status.as_str())
                .bind(doc.version as i64)
                .bind(doc.updated_at)
                .bind(&doc.body)
                .execute(c)
            })
            .map_err(|e| map_sqlx_error("update_document", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "document {} is not at version {expected_version}",
                doc.id
            )));
        }
        Ok(())
    }

    fn documents(
        &mut self,
        tenant_id: TenantId,
        filter: &DocumentFilter,
        page: PageRequest,
    ) -> Result<Page<DocumentRecord>, StoreError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
                AND ($2::text IS NULL OR kind = $2)
                AND ($3::text IS NULL OR status = $3)
        "#;
        let kind = filter.kind.map(|k| k.as_str());
        let status = filter.status.map(|s| s.as_str());

        let count_sql = format!("SELECT COUNT(*) AS total FROM documents {WHERE}");
        let total = self.count(
            "count_documents",
            sqlx::query(&count_sql).bind(raw(tenant_id)).bind(kind).bind(status),
        )?;

        let sql = format!("{DOCUMENT_COLUMNS} FROM documents {WHERE} ORDER BY id LIMIT $4 OFFSET $5");
        let rows = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(kind)
                    .bind(status)
                    .bind(i64::from(page.limit))
                    .bind(i64::from(page.offset))
                    .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error("documents", e))?;
        let items = rows
            .iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("documents", e))?;
        Ok(Page::new(items, total, page))
    }

    fn append_audit(&mut self, r: &AuditRecord) -> Result<(), StoreError> {
        self.run(|c| {
            sqlx::query(
                r#"
                INSERT INTO audit_log (id, tenant_id, entity, entity_id, action, before, after, actor, at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(r.id)
            .bind(raw(r.tenant_id))
            .bind(&r.entity)
            .bind(&r.entity_id)
            .bind(r.action.as_str())
            .bind(r.before.as_ref())
            .bind(r.after.as_ref())
            .bind(*r.actor.as_uuid())
            .bind(r.at)
            .execute(c)
        })
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    fn audit_log(
        &mut self,
        tenant_id: TenantId,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditRecord>, StoreError> {
        const WHERE: &str = r#"
            WHERE tenant_id = $1
                AND ($2::text IS NULL OR entity = $2)
                AND ($3::text IS NULL OR entity_id = $3)
                AND ($4::text IS NULL OR action = $4)
                AND ($5::timestamptz IS NULL OR at >= $5)
                AND ($6::timestamptz IS NULL OR at <= $6)
        "#;
        let action = filter.action.map(|a| a.as_str());

        let count_sql = format!("SELECT COUNT(*) AS total FROM audit_log {WHERE}");
        let total = self.count(
            "count_audit",
            sqlx::query(&count_sql)
                .bind(raw(tenant_id))
                .bind(filter.entity.as_deref())
                .bind(filter.entity_id.as_deref())
                .bind(action)
                .bind(filter.after)
                .bind(filter.before),
        )?;

        let sql = format!(
            r#"
            SELECT id, tenant_id, entity, entity_id, action, before, after, actor, at
            FROM audit_log {WHERE}
            ORDER BY seq ASC
            LIMIT $7 OFFSET $8
            "#
        );
        let rows = self
            .run(|c| {
                sqlx::query(&sql)
                    .bind(raw(tenant_id))
                    .bind(filter.entity.as_deref())
                    .bind(filter.entity_id.as_deref())
                    .bind(action)
                    .bind(filter.after)
                    .bind(filter.before)
                    .bind(i64::from(page.limit))
                    .bind(i64::from(page.offset))
                    .fetch_all(c)
            })
            .map_err(|e| map_sqlx_error("audit_log", e))?;
        let items = rows
            .iter()
            .map(audit_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("audit_log", e))?;
        Ok(Page::new(items, total, page))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTx { handle, tx, .. } = *self;
        tokio::task::block_in_place(|| handle.block_on(tx.commit()))
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

const LEVEL_COLUMNS: &str = "SELECT tenant_id, item_id, location_id, on_hand, allocated, \
                             reorder_point, reorder_qty, version, updated_at";

const LEVEL_SELECT_BY_KEY: &str = "SELECT tenant_id, item_id, location_id, on_hand, allocated, \
                                   reorder_point, reorder_qty, version, updated_at \
                                   FROM inventory_levels \
                                   WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3";

const DOCUMENT_COLUMNS: &str = "SELECT tenant_id, id, kind, number, status, version, updated_at, body";

fn raw(tenant_id: TenantId) -> Uuid {
    *tenant_id.as_uuid()
}

fn encode_body<T: Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(format!("serialization failed: {e}")))
}

fn decode_body<T: DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let body: JsonValue = row.try_get("body").map_err(|e| map_sqlx_error("decode_body", e))?;
    serde_json::from_value(body).map_err(|e| StoreError::Backend(format!("deserialization failed: {e}")))
}

fn decode_error(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn level_from_row(row: &PgRow) -> Result<InventoryLevel, sqlx::Error> {
    let key = LevelKey::new(
        TenantId::from_uuid(row.try_get("tenant_id")?),
        ItemId::new(AggregateId::from_uuid(row.try_get("item_id")?)),
        LocationId::new(AggregateId::from_uuid(row.try_get("location_id")?)),
    );
    let version: i64 = row.try_get("version")?;
    Ok(InventoryLevel::restore(
        key,
        row.try_get("on_hand")?,
        row.try_get("allocated")?,
        row.try_get("reorder_point")?,
        row.try_get("reorder_qty")?,
        version as u64,
        row.try_get("updated_at")?,
    ))
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, sqlx::Error> {
    let reason: String = row.try_get("reason")?;
    let reason = MovementReason::parse(&reason)
        .ok_or_else(|| decode_error(format!("unknown movement reason {reason}")))?;
    let ref_id: Option<Uuid> = row.try_get("ref_id")?;
    Ok(StockMovement {
        id: row.try_get("id")?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        item_id: ItemId::new(AggregateId::from_uuid(row.try_get("item_id")?)),
        location_id: LocationId::new(AggregateId::from_uuid(row.try_get("location_id")?)),
        quantity: row.try_get("quantity")?,
        reason,
        reference: MovementReference {
            kind: row.try_get("ref_kind")?,
            number: row.try_get("ref_number")?,
            ref_id: ref_id.map(AggregateId::from_uuid),
        },
        transaction_id: row.try_get("transaction_id")?,
        on_hand_after: row.try_get("on_hand_after")?,
        occurred_at: row.try_get("occurred_at")?,
        actor: UserId::from_uuid(row.try_get("actor")?),
    })
}

fn document_from_row(row: &PgRow) -> Result<DocumentRecord, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let version: i64 = row.try_get("version")?;
    Ok(DocumentRecord {
        id: DocumentId::new(AggregateId::from_uuid(row.try_get("id")?)),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        kind: DocumentKind::parse(&kind).ok_or_else(|| decode_error(format!("unknown document kind {kind}")))?,
        number: row.try_get("number")?,
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown document status {status}")))?,
        version: version as u64,
        updated_at: row.try_get("updated_at")?,
        body: row.try_get("body")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditRecord, sqlx::Error> {
    let action: String = row.try_get("action")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        entity: row.try_get("entity")?,
        entity_id: row.try_get("entity_id")?,
        action: AuditAction::parse(&action)
            .ok_or_else(|| decode_error(format!("unknown audit action {action}")))?,
        before: row.try_get("before")?,
        after: row.try_get("after")?,
        actor: UserId::from_uuid(row.try_get("actor")?),
        at: row.try_get("at")?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => StoreError::Backend(format!("unexpected row not found in {operation}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
