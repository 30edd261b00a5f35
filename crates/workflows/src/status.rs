//! Shared status enum and transition table for every document kind.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PurchaseOrder,
    GoodsReceipt,
    Transfer,
    Adjustment,
    CountBatch,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::GoodsReceipt => "goods_receipt",
            DocumentKind::Transfer => "transfer",
            DocumentKind::Adjustment => "adjustment",
            DocumentKind::CountBatch => "count_batch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase_order" => Some(DocumentKind::PurchaseOrder),
            "goods_receipt" => Some(DocumentKind::GoodsReceipt),
            "transfer" => Some(DocumentKind::Transfer),
            "adjustment" => Some(DocumentKind::Adjustment),
            "count_batch" => Some(DocumentKind::CountBatch),
            _ => None,
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Approved,
    Partial,
    Received,
    InTransit,
    Posted,
    Closed,
    Canceled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Partial => "PARTIAL",
            DocumentStatus::Received => "RECEIVED",
            DocumentStatus::InTransit => "IN_TRANSIT",
            DocumentStatus::Posted => "POSTED",
            DocumentStatus::Closed => "CLOSED",
            DocumentStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(DocumentStatus::Draft),
            "APPROVED" => Some(DocumentStatus::Approved),
            "PARTIAL" => Some(DocumentStatus::Partial),
            "RECEIVED" => Some(DocumentStatus::Received),
            "IN_TRANSIT" => Some(DocumentStatus::InTransit),
            "POSTED" => Some(DocumentStatus::Posted),
            "CLOSED" => Some(DocumentStatus::Closed),
            "CANCELED" => Some(DocumentStatus::Canceled),
            _ => None,
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Approve,
    Ship,
    Receive,
    Post,
    Close,
    Cancel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Ship => "ship",
            Action::Receive => "receive",
            Action::Post => "post",
            Action::Close => "close",
            Action::Cancel => "cancel",
        }
    }
}

/// Where a transition lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    To(DocumentStatus),
    /// Depends on whether every line is fully fulfilled after the effects.
    ByFulfillment {
        complete: DocumentStatus,
        partial: DocumentStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub kind: DocumentKind,
    pub action: Action,
    pub from: &'static [DocumentStatus],
    pub target: Target,
}

use DocumentKind as K;
use DocumentStatus as S;

const RULES: &[TransitionRule] = &[
    // Purchase order. A retried receive clamps to zero while the order is
    // still open; once RECEIVED, further receives conflict.
    TransitionRule { kind: K::PurchaseOrder, action: Action::Approve, from: &[S::Draft], target: Target::To(S::Approved) },
    TransitionRule {
        kind: K::PurchaseOrder,
        action: Action::Receive,
        from: &[S::Approved, S::Partial],
        target: Target::ByFulfillment { complete: S::Received, partial: S::Partial },
    },
    TransitionRule { kind: K::PurchaseOrder, action: Action::Close, from: &[S::Received, S::Partial], target: Target::To(S::Closed) },
    TransitionRule { kind: K::PurchaseOrder, action: Action::Cancel, from: &[S::Draft, S::Approved], target: Target::To(S::Canceled) },
    // Goods receipt
    TransitionRule { kind: K::GoodsReceipt, action: Action::Approve, from: &[S::Draft], target: Target::To(S::Approved) },
    TransitionRule { kind: K::GoodsReceipt, action: Action::Post, from: &[S::Approved], target: Target::To(S::Posted) },
    TransitionRule { kind: K::GoodsReceipt, action: Action::Close, from: &[S::Posted], target: Target::To(S::Closed) },
    TransitionRule { kind: K::GoodsReceipt, action: Action::Cancel, from: &[S::Draft, S::Approved], target: Target::To(S::Canceled) },
    // Transfer
    TransitionRule { kind: K::Transfer, action: Action::Approve, from: &[S::Draft], target: Target::To(S::Approved) },
    TransitionRule { kind: K::Transfer, action: Action::Ship, from: &[S::Approved], target: Target::To(S::InTransit) },
    TransitionRule { kind: K::Transfer, action: Action::Receive, from: &[S::InTransit], target: Target::To(S::Received) },
    TransitionRule { kind: K::Transfer, action: Action::Cancel, from: &[S::Draft, S::Approved], target: Target::To(S::Canceled) },
    // Adjustment
    TransitionRule { kind: K::Adjustment, action: Action::Approve, from: &[S::Draft], target: Target::To(S::Approved) },
    TransitionRule { kind: K::Adjustment, action: Action::Cancel, from: &[S::Draft], target: Target::To(S::Canceled) },
    // Count batch
    TransitionRule { kind: K::CountBatch, action: Action::Approve, from: &[S::Draft], target: Target::To(S::Approved) },
    TransitionRule { kind: K::CountBatch, action: Action::Cancel, from: &[S::Draft], target: Target::To(S::Canceled) },
];

/// Look up the rule for `action` on `kind`, if the kind supports it.
pub fn rule_for(kind: DocumentKind, action: Action) -> Option<&'static TransitionRule> {
    RULES.iter().find(|r| r.kind == kind && r.action == action)
}

/// Check that `action` is allowed from `current` and resolve its target.
pub fn next_status(
    kind: DocumentKind,
    action: Action,
    current: DocumentStatus,
    fulfilled: bool,
) -> DomainResult<DocumentStatus> {
    let rule = check_allowed(kind, action, current)?;
    Ok(match rule.target {
        Target::To(status) => status,
        Target::ByFulfillment { complete, partial } => {
            if fulfilled {
                complete
            } else {
                partial
            }
        }
    })
}

/// Status guard only, before any effects are computed.
pub fn check_allowed(
    kind: DocumentKind,
    action: Action,
    current: DocumentStatus,
) -> DomainResult<&'static TransitionRule> {
    let rule = rule_for(kind, action).ok_or_else(|| {
        DomainError::validation(format!("{kind} does not support {}", action.as_str()))
    })?;
    if !rule.from.contains(&current) {
        return Err(DomainError::conflict(format!(
            "cannot {} {kind} in status {current}",
            action.as_str()
        )));
    }
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approving_an_approved_order_is_a_conflict() {
        let err = next_status(K::PurchaseOrder, Action::Approve, S::Approved, false).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn unsupported_action_is_a_validation_error() {
        let err = next_status(K::Adjustment, Action::Ship, S::Draft, false).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn purchase_order_receive_depends_on_fulfillment() {
        assert_eq!(
            next_status(K::PurchaseOrder, Action::Receive, S::Approved, false).unwrap(),
            S::Partial
        );
        assert_eq!(
            next_status(K::PurchaseOrder, Action::Receive, S::Partial, true).unwrap(),
            S::Received
        );
        assert!(matches!(
            next_status(K::PurchaseOrder, Action::Receive, S::Received, true),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        for kind in [K::PurchaseOrder, K::GoodsReceipt, K::Transfer, K::Adjustment, K::CountBatch] {
            for action in [Action::Approve, Action::Ship, Action::Post, Action::Close, Action::Cancel] {
                assert!(next_status(kind, action, S::Canceled, true).is_err());
                assert!(next_status(kind, action, S::Closed, true).is_err());
            }
        }
    }

    #[test]
    fn status_codes_parse_back() {
        for s in [S::Draft, S::Approved, S::Partial, S::Received, S::InTransit, S::Posted, S::Closed, S::Canceled] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
        for k in [K::PurchaseOrder, K::GoodsReceipt, K::Transfer, K::Adjustment, K::CountBatch] {
            assert_eq!(DocumentKind::parse(k.as_str()), Some(k));
        }
    }
}
