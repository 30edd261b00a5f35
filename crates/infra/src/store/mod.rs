//! Transactional persistence boundary.
//!
//! Every mutating operation runs through exactly one [`StoreTx`]: catalog
//! lookups, level locks, movement appends, document updates and the audit
//! record all commit together or not at all.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    AuditFilter, DocumentFilter, DocumentRecord, LevelFilter, MovementFilter, MovementTotals, Store,
    StoreError, StoreTx,
};
