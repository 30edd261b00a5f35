use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_catalog::{ItemId, LocationId};
use stockledger_core::{AggregateId, TenantId, UserId};
use stockledger_events::Event;

/// Why stock moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    PoReceipt,
    Adjustment,
    TransferOut,
    TransferIn,
    Count,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::PoReceipt => "PO_RECEIPT",
            MovementReason::Adjustment => "ADJUSTMENT",
            MovementReason::TransferOut => "TRANSFER_OUT",
            MovementReason::TransferIn => "TRANSFER_IN",
            MovementReason::Count => "COUNT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PO_RECEIPT" => Some(MovementReason::PoReceipt),
            "ADJUSTMENT" => Some(MovementReason::Adjustment),
            "TRANSFER_OUT" => Some(MovementReason::TransferOut),
            "TRANSFER_IN" => Some(MovementReason::TransferIn),
            "COUNT" => Some(MovementReason::Count),
            _ => None,
        }
    }
}

impl core::fmt::Display for MovementReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer back to the document that produced a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    /// Document kind, e.g. `purchase_order`.
    pub kind: String,
    /// Human document number, e.g. `PO-1001`.
    pub number: String,
    pub ref_id: Option<AggregateId>,
}

impl MovementReference {
    pub fn new(kind: impl Into<String>, number: impl Into<String>, ref_id: AggregateId) -> Self {
        Self {
            kind: kind.into(),
            number: number.into(),
            ref_id: Some(ref_id),
        }
    }

    /// Reference for a movement applied directly through the ledger contract.
    pub fn manual(note: impl Into<String>) -> Self {
        Self {
            kind: "manual".to_string(),
            number: note.into(),
            ref_id: None,
        }
    }
}

/// One signed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    /// Positive = receipt, negative = issue. Never zero.
    pub quantity: i64,
    pub reason: MovementReason,
    pub reference: MovementReference,
    /// Store transaction that wrote this row together with the level update.
    pub transaction_id: Uuid,
    pub on_hand_after: i64,
    pub occurred_at: DateTime<Utc>,
    pub actor: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    StockMoved(StockMovement),
}

impl LedgerEvent {
    pub fn movement(&self) -> &StockMovement {
        match self {
            LedgerEvent::StockMoved(m) => m,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::StockMoved(_) => "ledger.stock.moved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::StockMoved(m) => m.occurred_at,
        }
    }
}
