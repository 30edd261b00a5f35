use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{DomainError, DomainResult, Money, RequestContext};
use stockledger_ledger::MovementReason;

use crate::document::{
    CatalogRefs, DocumentHeader, DocumentId, LinkedEffect, PlannedMovement, Transition,
    TransitionOutcome, Workflow, document_root, require_lines,
};
use crate::purchase_order::PurchaseOrder;
use crate::status::{DocumentKind, DocumentStatus};

/// Purchase order a receipt was raised against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedOrder {
    pub order_id: DocumentId,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub qty: i64,
    pub unit_cost: Option<Money>,
    /// Line of the linked purchase order this line fulfills.
    pub po_line_no: Option<u32>,
}

impl GoodsReceiptLine {
    pub fn new(item_id: ItemId, qty: i64, unit_cost: Option<Money>) -> Self {
        Self {
            line_no: 0,
            item_id,
            qty,
            unit_cost,
            po_line_no: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceipt {
    pub header: DocumentHeader,
    pub location_id: LocationId,
    pub purchase_order: Option<LinkedOrder>,
    pub lines: Vec<GoodsReceiptLine>,
}

impl GoodsReceipt {
    pub fn new(
        ctx: &RequestContext,
        number: &str,
        location_id: LocationId,
        lines: Vec<GoodsReceiptLine>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut receipt = Self {
            header: DocumentHeader::draft(ctx, DocumentKind::GoodsReceipt, number, notes, now)?,
            location_id,
            purchase_order: None,
            lines: Vec::new(),
        };
        receipt.set_lines(lines)?;
        Ok(receipt)
    }

    /// Draft a receipt for everything still outstanding on `order`.
    pub fn from_purchase_order(
        ctx: &RequestContext,
        number: &str,
        order: &PurchaseOrder,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        order.header.ensure_tenant(ctx.tenant_id())?;
        let status = order.header.status;
        if !matches!(status, DocumentStatus::Approved | DocumentStatus::Partial) {
            return Err(DomainError::conflict(format!(
                "cannot receive against purchase order {} in status {status}",
                order.header.number
            )));
        }
        let lines: Vec<GoodsReceiptLine> = order
            .outstanding_lines()
            .map(|l| GoodsReceiptLine {
                line_no: 0,
                item_id: l.item_id,
                qty: l.outstanding(),
                unit_cost: Some(l.unit_cost),
                po_line_no: Some(l.line_no),
            })
            .collect();
        if lines.is_empty() {
            return Err(DomainError::conflict(format!(
                "purchase order {} has nothing outstanding",
                order.header.number
            )));
        }

        let mut receipt = Self {
            header: DocumentHeader::draft(ctx, DocumentKind::GoodsReceipt, number, None, now)?,
            location_id: order.location_id,
            purchase_order: Some(LinkedOrder {
                order_id: order.header.id,
                number: order.header.number.clone(),
            }),
            lines: Vec::new(),
        };
        receipt.set_lines(lines)?;
        Ok(receipt)
    }

    fn post(&self) -> TransitionOutcome {
        let mut outcome = TransitionOutcome::default();
        for line in &self.lines {
            outcome.movements.push(PlannedMovement {
                line_no: line.line_no,
                item_id: line.item_id,
                location_id: self.location_id,
                quantity: line.qty,
                reason: MovementReason::PoReceipt,
            });
            if let (Some(order), Some(po_line_no)) = (&self.purchase_order, line.po_line_no) {
                outcome.linked.push(LinkedEffect::PurchaseOrderReceipt {
                    order_id: order.order_id,
                    line_no: po_line_no,
                    qty: line.qty,
                });
            }
        }
        outcome
    }
}

document_root!(GoodsReceipt);

impl Workflow for GoodsReceipt {
    const KIND: DocumentKind = DocumentKind::GoodsReceipt;

    type Line = GoodsReceiptLine;

    fn header(&self) -> &DocumentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut DocumentHeader {
        &mut self.header
    }

    fn lines(&self) -> &[GoodsReceiptLine] {
        &self.lines
    }

    fn set_lines(&mut self, lines: Vec<GoodsReceiptLine>) -> DomainResult<()> {
        self.header.ensure_draft()?;
        require_lines(&lines, Self::KIND)?;
        let linked = self.purchase_order.is_some();
        let mut renumbered = Vec::with_capacity(lines.len());
        for (i, mut line) in lines.into_iter().enumerate() {
            let line_no = i as u32 + 1;
            if line.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: received quantity must be positive"
                )));
            }
            if let Some(cost) = line.unit_cost {
                line.unit_cost = Some(Money::non_negative(cost.minor())?);
            }
            if !linked {
                line.po_line_no = None;
            }
            line.line_no = line_no;
            renumbered.push(line);
        }
        self.lines = renumbered;
        Ok(())
    }

    fn references(&self) -> CatalogRefs {
        CatalogRefs {
            items: self.lines.iter().map(|l| l.item_id).collect(),
            locations: vec![self.location_id],
            suppliers: Vec::new(),
        }
        .dedup()
    }

    fn effects(&mut self, transition: &Transition) -> DomainResult<TransitionOutcome> {
        match transition {
            Transition::Approve => {
                require_lines(&self.lines, Self::KIND)?;
                Ok(TransitionOutcome::default())
            }
            Transition::Post => Ok(self.post()),
            _ => Ok(TransitionOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{LineReceipt, apply_transition, test_support::ctx};
    use crate::purchase_order::PurchaseOrderLine;
    use stockledger_catalog::SupplierId;
    use stockledger_core::UserId;

    fn approved_order(ctx: &RequestContext, quantities: &[i64]) -> PurchaseOrder {
        let lines = quantities
            .iter()
            .map(|q| PurchaseOrderLine::new(ItemId::generate(), *q, Money::from_minor(100)))
            .collect();
        let mut po = PurchaseOrder::new(
            ctx,
            "PO-7",
            SupplierId::generate(),
            LocationId::generate(),
            lines,
            None,
            Utc::now(),
        )
        .unwrap();
        apply_transition(&mut po, &Transition::Approve, ctx.user_id(), Utc::now()).unwrap();
        po
    }

    #[test]
    fn copies_only_outstanding_lines() {
        let ctx = ctx();
        let mut po = approved_order(&ctx, &[10, 4]);
        apply_transition(
            &mut po,
            &Transition::Receive(vec![LineReceipt { line_no: 2, qty: 4 }]),
            ctx.user_id(),
            Utc::now(),
        )
        .unwrap();

        let gr = GoodsReceipt::from_purchase_order(&ctx, "GR-1", &po, Utc::now()).unwrap();
        assert_eq!(gr.lines.len(), 1);
        assert_eq!(gr.lines[0].po_line_no, Some(1));
        assert_eq!(gr.lines[0].qty, 10);
        assert_eq!(gr.lines[0].unit_cost, Some(Money::from_minor(100)));
        assert_eq!(gr.location_id, po.location_id);
        assert_eq!(gr.purchase_order.as_ref().map(|l| l.order_id), Some(po.header.id));
    }

    #[test]
    fn draft_order_cannot_be_received_against() {
        let ctx = ctx();
        let po = PurchaseOrder::new(
            &ctx,
            "PO-8",
            SupplierId::generate(),
            LocationId::generate(),
            vec![PurchaseOrderLine::new(ItemId::generate(), 3, Money::ZERO)],
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            GoodsReceipt::from_purchase_order(&ctx, "GR-2", &po, Utc::now()),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn foreign_order_is_not_found() {
        let po = approved_order(&ctx(), &[3]);
        assert!(matches!(
            GoodsReceipt::from_purchase_order(&ctx(), "GR-3", &po, Utc::now()),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn post_moves_stock_and_links_order_lines() {
        let ctx = ctx();
        let po = approved_order(&ctx, &[10, 5]);
        let mut gr = GoodsReceipt::from_purchase_order(&ctx, "GR-4", &po, Utc::now()).unwrap();
        let actor = UserId::new();

        apply_transition(&mut gr, &Transition::Approve, actor, Utc::now()).unwrap();
        let outcome = apply_transition(&mut gr, &Transition::Post, actor, Utc::now()).unwrap();

        assert_eq!(gr.header.status, DocumentStatus::Posted);
        assert_eq!(outcome.movements.len(), 2);
        assert!(outcome.movements.iter().all(|m| m.reason == MovementReason::PoReceipt));
        assert_eq!(outcome.linked.len(), 2);
        assert!(outcome.linked.contains(&LinkedEffect::PurchaseOrderReceipt {
            order_id: po.header.id,
            line_no: 2,
            qty: 5,
        }));
    }

    #[test]
    fn standalone_receipt_has_no_linked_effects() {
        let ctx = ctx();
        let mut line = GoodsReceiptLine::new(ItemId::generate(), 2, None);
        line.po_line_no = Some(1);
        let mut gr =
            GoodsReceipt::new(&ctx, "GR-5", LocationId::generate(), vec![line], None, Utc::now())
                .unwrap();
        assert_eq!(gr.lines[0].po_line_no, None);

        apply_transition(&mut gr, &Transition::Approve, ctx.user_id(), Utc::now()).unwrap();
        let outcome = apply_transition(&mut gr, &Transition::Post, ctx.user_id(), Utc::now()).unwrap();
        assert!(outcome.linked.is_empty());

        apply_transition(&mut gr, &Transition::Close, ctx.user_id(), Utc::now()).unwrap();
        assert_eq!(gr.header.status, DocumentStatus::Closed);
    }
}
