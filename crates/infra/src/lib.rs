//! Infrastructure layer: persistence, services, configuration.
//!
//! - [`store`]: the transactional `Store` boundary (in-memory + Postgres)
//! - [`ledger`]: the stock ledger contract every movement goes through
//! - [`workflow_service`]: document transitions, audit and publication
//! - [`catalog_service`]: reference data maintenance
//! - [`queries`]: tenant-scoped read API

pub mod catalog_service;
pub mod config;
pub mod error;
pub mod ledger;
mod outbox;
pub mod queries;
pub mod store;
pub mod workflow_service;


pub use catalog_service::CatalogService;
pub use config::InfraConfig;
pub use error::{ServiceError, ServiceResult};
pub use ledger::{LedgerService, MovementRequest, MovementResult};
pub use queries::{LevelView, Queries};
pub use store::{InMemoryStore, PostgresStore, Store, StoreError, StoreTx};
pub use workflow_service::{TransitionResult, WorkflowService};
