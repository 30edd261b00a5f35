use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{DomainError, DomainResult, RequestContext};
use stockledger_ledger::MovementReason;

use crate::document::{
    CatalogRefs, DocumentHeader, PlannedMovement, Transition, TransitionOutcome, Workflow,
    document_root, require_lines,
};
use crate::status::DocumentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentReason {
    Count,
    Damage,
    Correction,
    Expiry,
    Theft,
    Other,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Count => "COUNT",
            AdjustmentReason::Damage => "DAMAGE",
            AdjustmentReason::Correction => "CORRECTION",
            AdjustmentReason::Expiry => "EXPIRY",
            AdjustmentReason::Theft => "THEFT",
            AdjustmentReason::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub qty_expected: i64,
    pub qty_actual: i64,
}

impl AdjustmentLine {
    pub fn new(item_id: ItemId, qty_expected: i64, qty_actual: i64) -> Self {
        Self {
            line_no: 0,
            item_id,
            qty_expected,
            qty_actual,
        }
    }

    pub fn qty_diff(&self) -> i64 {
        self.qty_actual - self.qty_expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub header: DocumentHeader,
    pub location_id: LocationId,
    pub reason: AdjustmentReason,
    pub lines: Vec<AdjustmentLine>,
}

impl Adjustment {
    pub fn new(
        ctx: &RequestContext,
        number: &str,
        location_id: LocationId,
        reason: AdjustmentReason,
        lines: Vec<AdjustmentLine>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut adjustment = Self {
            header: DocumentHeader::draft(ctx, DocumentKind::Adjustment, number, notes, now)?,
            location_id,
            reason,
            lines: Vec::new(),
        };
        adjustment.set_lines(lines)?;
        Ok(adjustment)
    }
}

document_root!(Adjustment);

impl Workflow for Adjustment {
    const KIND: DocumentKind = DocumentKind::Adjustment;

    type Line = AdjustmentLine;

    fn header(&self) -> &DocumentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut DocumentHeader {
        &mut self.header
    }

    fn lines(&self) -> &[AdjustmentLine] {
        &self.lines
    }

    fn set_lines(&mut self, lines: Vec<AdjustmentLine>) -> DomainResult<()> {
        self.header.ensure_draft()?;
        require_lines(&lines, Self::KIND)?;
        let mut renumbered = Vec::with_capacity(lines.len());
        for (i, mut line) in lines.into_iter().enumerate() {
            let line_no = i as u32 + 1;
            if line.qty_expected < 0 || line.qty_actual < 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: expected and actual quantities cannot be negative"
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
        require_lines(&self.lines, Self::KIND)?;
        let movements = self
            .lines
            .iter()
            .filter(|l| l.qty_diff() != 0)
            .map(|l| PlannedMovement {
                line_no: l.line_no,
                item_id: l.item_id,
                location_id: self.location_id,
                quantity: l.qty_diff(),
                reason: MovementReason::Adjustment,
            })
            .collect();
        Ok(TransitionOutcome {
            movements,
            ..TransitionOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{apply_transition, test_support::ctx};
    use crate::status::DocumentStatus;
    use stockledger_core::UserId;

    fn adjustment(lines: Vec<AdjustmentLine>) -> Adjustment {
        Adjustment::new(
            &ctx(),
            "ADJ-1",
            LocationId::generate(),
            AdjustmentReason::Damage,
            lines,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn approve_emits_only_non_zero_diffs() {
        let mut adj = adjustment(vec![
            AdjustmentLine::new(ItemId::generate(), 10, 7),
            AdjustmentLine::new(ItemId::generate(), 4, 4),
            AdjustmentLine::new(ItemId::generate(), 0, 2),
        ]);
        let out = apply_transition(&mut adj, &Transition::Approve, UserId::new(), Utc::now()).unwrap();
        let quantities: Vec<i64> = out.movements.iter().map(|m| m.quantity).collect();
        assert_eq!(quantities, vec![-3, 2]);
        assert!(out.movements.iter().all(|m| m.reason == MovementReason::Adjustment));
        assert_eq!(adj.header.status, DocumentStatus::Approved);
    }

    #[test]
    fn zero_diff_approval_still_transitions() {
        let mut adj = adjustment(vec![AdjustmentLine::new(ItemId::generate(), 5, 5)]);
        let out = apply_transition(&mut adj, &Transition::Approve, UserId::new(), Utc::now()).unwrap();
        assert!(out.movements.is_empty());
        assert!(!out.noop);
        assert_eq!(adj.header.status, DocumentStatus::Approved);
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let err = Adjustment::new(
            &ctx(),
            "ADJ-2",
            LocationId::generate(),
            AdjustmentReason::Other,
            vec![AdjustmentLine::new(ItemId::generate(), -1, 0)],
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approved_adjustment_cannot_be_canceled() {
        let mut adj = adjustment(vec![AdjustmentLine::new(ItemId::generate(), 1, 2)]);
        apply_transition(&mut adj, &Transition::Approve, UserId::new(), Utc::now()).unwrap();
        assert!(matches!(
            apply_transition(&mut adj, &Transition::Cancel, UserId::new(), Utc::now()),
            Err(DomainError::Conflict(_))
        ));
    }
}
