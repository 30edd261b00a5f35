//! Facts emitted by the ledger and the workflows.
//!
//! - [`Event`]: typed domain event contract
//! - [`EventEnvelope`]: tenant-scoped unit published after commit
//! - [`EventBus`]: pub/sub transport for asynchronous consumers (reporting)
//! - [`AuditRecord`]: before/after snapshot persisted with each transition

pub mod audit;
pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use audit::{AuditAction, AuditRecord};
pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{DEFAULT_QUEUE_CAPACITY, InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
