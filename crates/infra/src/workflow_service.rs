//! Workflow execution pipeline.
//!
//! Owns the plumbing every document kind shares:
//!
//! ```text
//! begin
//!   ↓
//! 1. Load + lock the document (tenant-scoped), optimistic version check
//!   ↓
//! 2. apply_transition (pure: status guard, line bookkeeping, planned effects)
//!   ↓
//! 3. Linked documents (e.g. the purchase order behind a goods receipt)
//!   ↓
//! 4. Movements through the ledger, in LevelKey order
//!   ↓
//! 5. Persist document + audit record
//!   ↓
//! commit → publish envelopes
//! ```
//!
//! Documents are always locked before inventory levels, which keeps lock
//! acquisition order identical across transitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{AggregateRoot, DomainError, ExpectedVersion, RequestContext};
use stockledger_events::{AuditAction, AuditRecord, EventBus, EventEnvelope};
use stockledger_ledger::{LevelKey, StockMovement};
use stockledger_workflows::{
    Action, CatalogRefs, CountBatch, DocumentId, GoodsReceipt, LineReceipt, LinkedEffect, PurchaseOrder,
    Transfer, Transition, Workflow, WorkflowEvent, apply_transition,
};

use crate::error::ServiceResult;
use crate::ledger::{MovementRequest, post_movement};
use crate::outbox::Outbox;
use crate::store::{DocumentRecord, Store, StoreTx};

/// A committed (or no-op) transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult<W> {
    pub document: W,
    /// Movements written by this transition, in application order.
    pub movements: Vec<StockMovement>,
    /// The request changed nothing (e.g. a retried receive) and nothing was
    /// committed.
    pub noop: bool,
}

fn audit_action(action: Action) -> AuditAction {
    match action {
        Action::Approve => AuditAction::Approve,
        Action::Ship => AuditAction::Ship,
        Action::Receive => AuditAction::Receive,
        Action::Post => AuditAction::Post,
        Action::Close => AuditAction::Close,
        Action::Cancel => AuditAction::Cancel,
    }
}

fn load<W: Workflow>(tx: &mut (dyn StoreTx + '_), ctx: &RequestContext, id: DocumentId) -> ServiceResult<W> {
    let record = tx
        .load_document(ctx.tenant_id(), W::KIND, id)?
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", W::KIND)))?;
    let doc: W = record.decode()?;
    doc.header().ensure_tenant(ctx.tenant_id())?;
    Ok(doc)
}

/// Every catalog id a document points at must exist in the caller's tenant.
fn resolve_refs(tx: &mut (dyn StoreTx + '_), ctx: &RequestContext, refs: CatalogRefs) -> ServiceResult<()> {
    let tenant_id = ctx.tenant_id();
    let refs = refs.dedup();
    for id in refs.items {
        tx.item(tenant_id, id)?
            .ok_or_else(|| DomainError::not_found(format!("item {id}")))?;
    }
    for id in refs.locations {
        tx.location(tenant_id, id)?
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))?;
    }
    for id in refs.suppliers {
        tx.supplier(tenant_id, id)?
            .ok_or_else(|| DomainError::not_found(format!("supplier {id}")))?;
    }
    Ok(())
}

fn audit<W: Workflow>(
    ctx: &RequestContext,
    action: AuditAction,
    before: Option<&W>,
    after: &W,
    now: DateTime<Utc>,
) -> ServiceResult<AuditRecord> {
    let header = after.header();
    Ok(AuditRecord::new(
        ctx.tenant_id(),
        header.kind.as_str(),
        header.id,
        action,
        before.map(serde_json::to_value).transpose()?,
        Some(serde_json::to_value(after)?),
        ctx.user_id(),
        now,
    ))
}

fn insert_new<W: Workflow>(
    tx: &mut (dyn StoreTx + '_),
    ctx: &RequestContext,
    doc: &W,
    now: DateTime<Utc>,
    outbox: &mut Outbox,
) -> ServiceResult<()> {
    doc.header().ensure_tenant(ctx.tenant_id())?;
    resolve_refs(tx, ctx, doc.references())?;
    tx.insert_document(&DocumentRecord::encode(doc)?)?;
    tx.append_audit(&audit(ctx, AuditAction::Create, None, doc, now)?)?;
    outbox.document(doc.header(), &WorkflowEvent::created(doc.header(), ctx.user_id()))?;
    Ok(())
}

/// Runs document workflows against a [`Store`], publishing to an [`EventBus`].
#[derive(Debug)]
pub struct WorkflowService<S, B> {
    store: S,
    bus: B,
}

impl<S, B> WorkflowService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> WorkflowService<S, B>
where
    S: Store,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Persist a freshly drafted document.
    ///
    /// Catalog references must resolve in the caller's tenant; a duplicate
    /// number for the same kind is a `Conflict`.
    #[instrument(
        skip(self, ctx, doc),
        fields(tenant_id = %ctx.tenant_id(), kind = %W::KIND, number = %doc.header().number),
        err
    )]
    pub fn create<W: Workflow>(&self, ctx: &RequestContext, doc: W) -> ServiceResult<W> {
        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();
        insert_new(tx.as_mut(), ctx, &doc, now, &mut outbox)?;
        tx.commit()?;

        info!(document_id = %doc.header().id, "document created");
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(doc)
    }

    /// Draft a goods receipt for everything outstanding on a purchase order.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create_receipt_from_po(
        &self,
        ctx: &RequestContext,
        number: &str,
        purchase_order_id: DocumentId,
    ) -> ServiceResult<GoodsReceipt> {
        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();
        let order: PurchaseOrder = load(tx.as_mut(), ctx, purchase_order_id)?;
        let receipt = GoodsReceipt::from_purchase_order(ctx, number, &order, now)?;
        insert_new(tx.as_mut(), ctx, &receipt, now, &mut outbox)?;
        tx.commit()?;

        info!(document_id = %receipt.header.id, lines = receipt.lines.len(), "goods receipt drafted from purchase order");
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(receipt)
    }

    /// Draft a count batch, snapshotting current on-hand for each item.
    #[instrument(skip(self, ctx, items), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn create_count_batch(
        &self,
        ctx: &RequestContext,
        number: &str,
        location_id: LocationId,
        items: Vec<ItemId>,
        notes: Option<String>,
    ) -> ServiceResult<CountBatch> {
        let now = Utc::now();
        let tenant_id = ctx.tenant_id();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();

        let mut snapshot = Vec::with_capacity(items.len());
        for item_id in items {
            let on_hand = tx
                .level(LevelKey::new(tenant_id, item_id, location_id))?
                .map(|l| l.on_hand())
                .unwrap_or(0);
            snapshot.push((item_id, on_hand));
        }
        let batch = CountBatch::new(ctx, number, location_id, snapshot, notes, now)?;
        insert_new(tx.as_mut(), ctx, &batch, now, &mut outbox)?;
        tx.commit()?;

        info!(document_id = %batch.header.id, lines = batch.lines.len(), "count batch created");
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(batch)
    }

    /// Replace every line of a DRAFT document.
    pub fn replace_lines<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        lines: Vec<W::Line>,
        expected: ExpectedVersion,
    ) -> ServiceResult<W> {
        self.edit_draft(ctx, id, expected, |doc: &mut W| doc.set_lines(lines))
    }

    /// Point a free-text transfer line at a catalog item.
    pub fn resolve_transfer_line(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        line_no: u32,
        item_id: ItemId,
        expected: ExpectedVersion,
    ) -> ServiceResult<Transfer> {
        self.edit_draft(ctx, id, expected, |doc: &mut Transfer| doc.resolve_line(line_no, item_id))
    }

    /// Enter the counted quantity of one count batch line.
    pub fn record_count(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        line_no: u32,
        counted_qty: i64,
        expected: ExpectedVersion,
    ) -> ServiceResult<CountBatch> {
        self.edit_draft(ctx, id, expected, |doc: &mut CountBatch| doc.record_count(line_no, counted_qty))
    }

    pub fn approve<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<W>> {
        self.transition(ctx, id, Transition::Approve, expected)
    }

    pub fn cancel<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<W>> {
        self.transition(ctx, id, Transition::Cancel, expected)
    }

    pub fn close<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<W>> {
        self.transition(ctx, id, Transition::Close, expected)
    }

    /// Receive against a purchase order. Over-receipt is clamped; a retry
    /// whose every line clamps to zero is a no-op while the order is open.
    /// A RECEIVED order rejects further receives with a conflict.
    pub fn receive_purchase_order(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        lines: Vec<LineReceipt>,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<PurchaseOrder>> {
        self.transition(ctx, id, Transition::Receive(lines), expected)
    }

    /// Post a goods receipt: stock in, plus the linked purchase order advanced.
    pub fn post_receipt(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<GoodsReceipt>> {
        self.transition(ctx, id, Transition::Post, expected)
    }

    pub fn ship_transfer(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<Transfer>> {
        self.transition(ctx, id, Transition::Ship, expected)
    }

    pub fn receive_transfer(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<Transfer>> {
        self.transition(ctx, id, Transition::Receive(Vec::new()), expected)
    }

    /// Run any transition on any document kind in one transaction.
    #[instrument(
        skip(self, ctx, transition),
        fields(tenant_id = %ctx.tenant_id(), kind = %W::KIND, document_id = %id, action = transition.action().as_str()),
        err
    )]
    pub fn transition<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        transition: Transition,
        expected: ExpectedVersion,
    ) -> ServiceResult<TransitionResult<W>> {
        let now = Utc::now();
        let action = transition.action();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();

        let mut doc: W = load(tx.as_mut(), ctx, id)?;
        expected.check(doc.header().version)?;
        let before = doc.clone();
        let outcome = apply_transition(&mut doc, &transition, ctx.user_id(), now)?;
        if outcome.noop {
            // Dropping the transaction rolls back; there is nothing to write.
            info!(status = %doc.header().status, "transition changed nothing");
            return Ok(TransitionResult {
                document: doc,
                movements: Vec::new(),
                noop: true,
            });
        }

        self.apply_linked(tx.as_mut(), ctx, &outcome.linked, now, &mut outbox)?;

        let mut planned = outcome.movements;
        planned.sort_by_key(|m| (m.item_id, m.location_id, m.line_no));
        let reference = doc.header().movement_reference();
        let mut movements = Vec::with_capacity(planned.len());
        for p in &planned {
            let request = MovementRequest {
                item_id: p.item_id,
                location_id: p.location_id,
                quantity: p.quantity,
                reason: p.reason,
                reference: reference.clone(),
            };
            let result = post_movement(tx.as_mut(), ctx, &request, now)?.result;
            outbox.movement(&result.movement, result.level.version())?;
            movements.push(result.movement);
        }

        tx.update_document(&DocumentRecord::encode(&doc)?, before.header().version)?;
        tx.append_audit(&audit(ctx, audit_action(action), Some(&before), &doc, now)?)?;
        let from = before.header().status;
        outbox.document(
            doc.header(),
            &WorkflowEvent::transitioned(doc.header(), action, from, ctx.user_id()),
        )?;
        tx.commit()?;

        info!(
            from = %from,
            to = %doc.header().status,
            movements = movements.len(),
            published = outbox.len(),
            "transition committed"
        );
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(TransitionResult {
            document: doc,
            movements,
            noop: false,
        })
    }

    /// Commit the side effects a transition has on other documents.
    fn apply_linked(
        &self,
        tx: &mut (dyn StoreTx + '_),
        ctx: &RequestContext,
        linked: &[LinkedEffect],
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> ServiceResult<()> {
        let mut by_order: BTreeMap<DocumentId, Vec<LineReceipt>> = BTreeMap::new();
        for effect in linked {
            match effect {
                LinkedEffect::PurchaseOrderReceipt { order_id, line_no, qty } => {
                    by_order.entry(*order_id).or_default().push(LineReceipt {
                        line_no: *line_no,
                        qty: *qty,
                    });
                }
            }
        }

        for (order_id, receipts) in by_order {
            let mut order: PurchaseOrder = load(tx, ctx, order_id)?;
            let before = order.clone();
            let outcome = order.apply_linked_receipts(receipts, ctx.user_id(), now)?;
            if outcome.noop {
                continue;
            }
            tx.update_document(&DocumentRecord::encode(&order)?, before.header.version)?;
            tx.append_audit(&audit(ctx, AuditAction::LinkedUpdate, Some(&before), &order, now)?)?;
            outbox.document(
                &order.header,
                &WorkflowEvent::transitioned(&order.header, Action::Receive, before.header.status, ctx.user_id()),
            )?;
            info!(order_id = %order_id, status = %order.header.status, "linked purchase order advanced");
        }
        Ok(())
    }

    /// Mutate a DRAFT document's lines under the usual checks.
    #[instrument(skip(self, ctx, edit), fields(tenant_id = %ctx.tenant_id(), kind = %W::KIND, document_id = %id), err)]
    fn edit_draft<W: Workflow>(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        expected: ExpectedVersion,
        edit: impl FnOnce(&mut W) -> stockledger_core::DomainResult<()>,
    ) -> ServiceResult<W> {
        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut outbox = Outbox::new();

        let mut doc: W = load(tx.as_mut(), ctx, id)?;
        expected.check(doc.header().version)?;
        doc.header().ensure_draft()?;
        let before = doc.clone();
        edit(&mut doc)?;
        resolve_refs(tx.as_mut(), ctx, doc.references())?;
        doc.header_mut().touch(now);

        tx.update_document(&DocumentRecord::encode(&doc)?, before.header().version)?;
        tx.append_audit(&audit(ctx, AuditAction::Update, Some(&before), &doc, now)?)?;
        outbox.document(doc.header(), &WorkflowEvent::lines_replaced(doc.header(), ctx.user_id()))?;
        tx.commit()?;

        info!(version = doc.header().version, "draft updated");
        outbox.flush(ctx.tenant_id(), &self.bus);
        Ok(doc)
    }
}
