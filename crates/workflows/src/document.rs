//! Document header, the `Workflow` trait, and the generic transition driver.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use stockledger_catalog::{ItemId, LocationId, SupplierId};
use stockledger_core::{
    DomainError, DomainResult, RequestContext, TenantId, UserId, typed_id,
};
use stockledger_ledger::{MovementReason, MovementReference};

use crate::status::{Action, DocumentKind, DocumentStatus, check_allowed, next_status};

typed_id!(
    /// Identifier of any workflow document.
    DocumentId
);

/// Header fields shared by every document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub kind: DocumentKind,
    pub number: String,
    pub status: DocumentStatus,
    pub version: u64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl DocumentHeader {
    pub fn draft(
        ctx: &RequestContext,
        kind: DocumentKind,
        number: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let number = number.trim();
        if number.is_empty() {
            return Err(DomainError::validation("document number cannot be empty"));
        }
        Ok(Self {
            id: DocumentId::generate(),
            tenant_id: ctx.tenant_id(),
            kind,
            number: number.to_string(),
            status: DocumentStatus::Draft,
            version: 1,
            created_by: ctx.user_id(),
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            notes: notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        })
    }

    /// Cross-tenant access looks exactly like a missing document.
    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("{} {}", self.kind, self.id)));
        }
        Ok(())
    }

    pub fn ensure_draft(&self) -> DomainResult<()> {
        if self.status != DocumentStatus::Draft {
            return Err(DomainError::conflict(format!(
                "{} {} lines can only change in DRAFT (status: {})",
                self.kind, self.number, self.status
            )));
        }
        Ok(())
    }

    /// Reference stamped on every movement this document produces.
    pub fn movement_reference(&self) -> MovementReference {
        MovementReference::new(self.kind.as_str(), self.number.clone(), self.id.as_aggregate_id())
    }

    /// Record a committed mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// Requested quantity for one line of a receive transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line_no: u32,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Approve,
    Ship,
    Receive(Vec<LineReceipt>),
    Post,
    Close,
    Cancel,
}

impl Transition {
    pub fn action(&self) -> Action {
        match self {
            Transition::Approve => Action::Approve,
            Transition::Ship => Action::Ship,
            Transition::Receive(_) => Action::Receive,
            Transition::Post => Action::Post,
            Transition::Close => Action::Close,
            Transition::Cancel => Action::Cancel,
        }
    }
}

/// A ledger mutation a transition asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMovement {
    pub line_no: u32,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub reason: MovementReason,
}

/// A mutation of another document that must commit with this transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkedEffect {
    /// Advance `qty_received` on a purchase order line.
    PurchaseOrderReceipt {
        order_id: DocumentId,
        line_no: u32,
        qty: i64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: Option<DocumentStatus>,
    pub movements: Vec<PlannedMovement>,
    pub linked: Vec<LinkedEffect>,
    /// Nothing changed (e.g. a retried receive that clamped to zero).
    pub noop: bool,
}

/// Catalog ids a document points at; all must resolve in the caller's tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRefs {
    pub items: Vec<ItemId>,
    pub locations: Vec<LocationId>,
    pub suppliers: Vec<SupplierId>,
}

impl CatalogRefs {
    pub fn dedup(mut self) -> Self {
        self.items.sort();
        self.items.dedup();
        self.locations.sort();
        self.locations.dedup();
        self.suppliers.sort();
        self.suppliers.dedup();
        self
    }
}

/// One document kind plugged into the shared state machine.
pub trait Workflow:
    Clone + PartialEq + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: DocumentKind;

    type Line: Clone + PartialEq + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync;

    fn header(&self) -> &DocumentHeader;

    fn header_mut(&mut self) -> &mut DocumentHeader;

    fn lines(&self) -> &[Self::Line];

    /// Replace all lines (renumbered 1..n) after validating them.
    fn set_lines(&mut self, lines: Vec<Self::Line>) -> DomainResult<()>;

    fn references(&self) -> CatalogRefs;

    /// Stock effects and line bookkeeping of `transition`.
    ///
    /// Runs after the status guard passed. Must leave the document unchanged
    /// when it returns an error.
    fn effects(&mut self, transition: &Transition) -> DomainResult<TransitionOutcome>;

    /// Whether every line is complete, for fulfillment-dependent targets.
    fn is_fulfilled(&self) -> bool {
        true
    }
}

/// Documents are aggregate roots keyed by their header id.
macro_rules! document_root {
    ($t:ty) => {
        impl stockledger_core::AggregateRoot for $t {
            type Id = $crate::document::DocumentId;

            fn id(&self) -> &Self::Id {
                &self.header.id
            }

            fn version(&self) -> u64 {
                self.header.version
            }
        }
    };
}
pub(crate) use document_root;

/// Drive `transition` on `doc`: guard, effects, target status, header stamps.
///
/// On error `doc` is left as it was. On a no-op the version is not bumped.
pub fn apply_transition<W: Workflow>(
    doc: &mut W,
    transition: &Transition,
    actor: UserId,
    now: DateTime<Utc>,
) -> DomainResult<TransitionOutcome> {
    let action = transition.action();
    let from = doc.header().status;
    check_allowed(W::KIND, action, from)?;

    let before = doc.clone();
    let resolved = doc
        .effects(transition)
        .and_then(|outcome| Ok((outcome, next_status(W::KIND, action, from, doc.is_fulfilled())?)));
    let (mut outcome, to) = match resolved {
        Ok(pair) => pair,
        Err(err) => {
            *doc = before;
            return Err(err);
        }
    };

    outcome.from = Some(from);
    let header = doc.header_mut();
    header.status = to;
    if action == Action::Approve {
        header.approved_by = Some(actor);
        header.approved_at = Some(now);
    }

    if *doc == before {
        outcome.noop = true;
        return Ok(outcome);
    }
    doc.header_mut().touch(now);
    Ok(outcome)
}

/// Shared line-number validation for `set_lines` implementations.
pub(crate) fn require_lines<L>(lines: &[L], kind: DocumentKind) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation(format!("{kind} requires at least one line")));
    }
    Ok(())
}

/// Shared lookup for line-addressed operations.
pub(crate) fn line_index<L>(
    lines: &[L],
    line_no: u32,
    line_no_of: impl Fn(&L) -> u32,
) -> DomainResult<usize> {
    lines
        .iter()
        .position(|l| line_no_of(l) == line_no)
        .ok_or_else(|| DomainError::not_found(format!("line {line_no}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use stockledger_core::{RequestContext, Role, TenantId, UserId};

    pub fn ctx() -> RequestContext {
        RequestContext::new(TenantId::new(), UserId::new(), Role::Manager)
    }
}
