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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub line_no: u32,
    pub item_id: ItemId,
    /// Ledger on-hand when the batch was created.
    pub expected_on_hand: i64,
    pub counted_qty: Option<i64>,
}

impl CountLine {
    pub fn new(item_id: ItemId, expected_on_hand: i64) -> Self {
        Self {
            line_no: 0,
            item_id,
            expected_on_hand,
            counted_qty: None,
        }
    }

    pub fn diff(&self) -> Option<i64> {
        self.counted_qty.map(|c| c - self.expected_on_hand)
    }
}

/// Physical count of a set of items at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBatch {
    pub header: DocumentHeader,
    pub location_id: LocationId,
    pub lines: Vec<CountLine>,
}

impl CountBatch {
    /// `snapshot` pairs each item with its current on-hand at `location_id`.
    pub fn new(
        ctx: &RequestContext,
        number: &str,
        location_id: LocationId,
        snapshot: Vec<(ItemId, i64)>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut seen = std::collections::HashSet::new();
        if let Some((dup, _)) = snapshot.iter().find(|(item, _)| !seen.insert(*item)) {
            return Err(DomainError::validation(format!(
                "item {dup} appears twice in count batch"
            )));
        }
        let mut batch = Self {
            header: DocumentHeader::draft(ctx, DocumentKind::CountBatch, number, notes, now)?,
            location_id,
            lines: Vec::new(),
        };
        batch.set_lines(
            snapshot
                .into_iter()
                .map(|(item_id, on_hand)| CountLine::new(item_id, on_hand))
                .collect(),
        )?;
        Ok(batch)
    }

    pub fn record_count(&mut self, line_no: u32, counted_qty: i64) -> DomainResult<()> {
        self.header.ensure_draft()?;
        if counted_qty < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        let idx = line_index(&self.lines, line_no, |l| l.line_no)?;
        self.lines[idx].counted_qty = Some(counted_qty);
        Ok(())
    }
}

document_root!(CountBatch);

impl Workflow for CountBatch {
    const KIND: DocumentKind = DocumentKind::CountBatch;

    type Line = CountLine;

    fn header(&self) -> &DocumentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut DocumentHeader {
        &mut self.header
    }

    fn lines(&self) -> &[CountLine] {
        &self.lines
    }

    fn set_lines(&mut self, lines: Vec<CountLine>) -> DomainResult<()> {
        self.header.ensure_draft()?;
        require_lines(&lines, Self::KIND)?;
        let mut renumbered = Vec::with_capacity(lines.len());
        for (i, mut line) in lines.into_iter().enumerate() {
            let line_no = i as u32 + 1;
            if line.expected_on_hand < 0 || line.counted_qty.is_some_and(|c| c < 0) {
                return Err(DomainError::validation(format!(
                    "line {line_no}: quantities cannot be negative"
                )));
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
        let Transition::Approve = transition else {
            return Ok(TransitionOutcome::default());
        };
        let mut movements = Vec::new();
        for line in &self.lines {
            let diff = line.diff().ok_or_else(|| {
                DomainError::validation(format!("line {} has not been counted", line.line_no))
            })?;
            if diff != 0 {
                movements.push(PlannedMovement {
                    line_no: line.line_no,
                    item_id: line.item_id,
                    location_id: self.location_id,
                    quantity: diff,
                    reason: MovementReason::Count,
                });
            }
        }
        Ok(TransitionOutcome {
            movements,
            ..TransitionOutcome::default()
        })
    }
}
