//! Stock ledger domain (event-sourced).
//!
//! `InventoryLevel` is the aggregate for one (tenant, item, location) key and
//! `StockMovement` is its append-only event. Current on-hand is derived state:
//! replaying a level's movements must reproduce it exactly.

pub mod level;
pub mod movement;

pub use level::{Discrepancy, InventoryLevel, LedgerCommand, LevelKey, MoveStock, verify_level};
pub use movement::{LedgerEvent, MovementReason, MovementReference, StockMovement};
