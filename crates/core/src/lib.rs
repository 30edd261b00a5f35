//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, the request context handed in by the
//! identity collaborator, and paging types shared by the read API.

pub mod aggregate;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod paging;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use context::{RequestContext, Role};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use paging::{Page, PageRequest};
pub use value_object::{Money, ValueObject};
