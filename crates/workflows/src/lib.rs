//! Stock-affecting document workflows.
//!
//! One status enum and one transition table ([`status`]) drive every document
//! kind. Each kind implements [`Workflow`] to supply its validation, the
//! catalog ids it references, and the stock effects of each action. All of
//! this is pure: the infrastructure layer wraps a transition, its movements
//! and its audit record into one store transaction.

pub mod adjustment;
pub mod count_batch;
pub mod document;
pub mod event;
pub mod goods_receipt;
pub mod purchase_order;
pub mod status;
pub mod transfer;

pub use adjustment::{Adjustment, AdjustmentLine, AdjustmentReason};
pub use count_batch::{CountBatch, CountLine};
pub use document::{
    CatalogRefs, DocumentHeader, DocumentId, LineReceipt, LinkedEffect, PlannedMovement,
    Transition, TransitionOutcome, Workflow, apply_transition,
};
pub use event::{DocumentChanged, WorkflowEvent};
pub use goods_receipt::{GoodsReceipt, GoodsReceiptLine, LinkedOrder};
pub use purchase_order::{PurchaseOrder, PurchaseOrderLine};
pub use status::{
    Action, DocumentKind, DocumentStatus, Target, TransitionRule, check_allowed, next_status, rule_for,
};
pub use transfer::{Transfer, TransferItem, TransferLine};
