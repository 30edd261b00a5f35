use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{DomainError, DomainResult, RequestContext};
use stockledger_ledger::MovementReason;

use crate::document::{
    CatalogRefs, DocumentHeader, PlannedMovement, Transition, TransitionOutcome, Workflow,
    document_root, line_index, require_lines,
};
use crate::status::DocumentKind;

/// A transfer line names either a catalog item or free text typed by the
/// user. Free-text lines are carried but never move stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TransferItem {
    Resolved(ItemId),
    Unresolved(String),
}

impl TransferItem {
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            TransferItem::Resolved(id) => Some(*id),
            TransferItem::Unresolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub item: TransferItem,
    pub qty: i64,
}

impl TransferLine {
    pub fn new(item: TransferItem, qty: i64) -> Self {
        Self {
            line_no: 0,
            item,
            qty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub header: DocumentHeader,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub lines: Vec<TransferLine>,
}

impl Transfer {
    pub fn new(
        ctx: &RequestContext,
        number: &str,
        from_location_id: LocationId,
        to_location_id: LocationId,
        lines: Vec<TransferLine>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if from_location_id == to_location_id {
            return Err(DomainError::validation(
                "transfer source and destination must differ",
            ));
        }
        let mut transfer = Self {
            header: DocumentHeader::draft(ctx, DocumentKind::Transfer, number, notes, now)?,
            from_location_id,
            to_location_id,
            lines: Vec::new(),
        };
        transfer.set_lines(lines)?;
        Ok(transfer)
    }

    /// Point a free-text line at a catalog item. Only while DRAFT.
    pub fn resolve_line(&mut self, line_no: u32, item_id: ItemId) -> DomainResult<()> {
        self.header.ensure_draft()?;
        let idx = line_index(&self.lines, line_no, |l| l.line_no)?;
        self.lines[idx].item = TransferItem::Resolved(item_id);
        Ok(())
    }

    fn movements(&self, location_id: LocationId, sign: i64, reason: MovementReason) -> TransitionOutcome {
        let movements = self
            .lines
            .iter()
            .filter_map(|line| {
                line.item.item_id().map(|item_id| PlannedMovement {
                    line_no: line.line_no,
                    item_id,
                    location_id,
                    quantity: sign * line.qty,
                    reason,
                })
            })
            .collect();
        TransitionOutcome {
            movements,
            ..TransitionOutcome::default()
        }
    }
}

document_root!(Transfer);

impl Workflow for Transfer {
    const KIND: DocumentKind = DocumentKind::Transfer;

    type Line = TransferLine;

    fn header(&self) -> &DocumentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut DocumentHeader {
        &mut self.header
    }

    fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    fn set_lines(&mut self, lines: Vec<TransferLine>) -> DomainResult<()> {
        self.header.ensure_draft()?;
        require_lines(&lines, Self::KIND)?;
        let mut renumbered = Vec::with_capacity(lines.len());
        for (i, mut line) in lines.into_iter().enumerate() {
            let line_no = i as u32 + 1;
            if line.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: transfer quantity must be positive"
                )));
            }
            if let TransferItem::Unresolved(text) = &line.item {
                let text = text.trim();
                if text.is_empty() {
                    return Err(DomainError::validation(format!(
                        "line {line_no}: item reference cannot be empty"
                    )));
                }
                line.item = TransferItem::Unresolved(text.to_string());
            }
            line.line_no = line_no;
            renumbered.push(line);
        }
        self.lines = renumbered;
        Ok(())
    }

    fn references(&self) -> CatalogRefs {
        CatalogRefs {
            items: self.lines.iter().filter_map(|l| l.item.item_id()).collect(),
            locations: vec![self.from_location_id, self.to_location_id],
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
            Transition::Ship => Ok(self.movements(self.from_location_id, -1, MovementReason::TransferOut)),
            Transition::Receive(_) => Ok(self.movements(self.to_location_id, 1, MovementReason::TransferIn)),
            _ => Ok(TransitionOutcome::default()),
        }
    }
}
