//! Domain error model.

use thiserror::Error;

use crate::id::AggregateId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Store and transport failures are
/// wrapped one layer up, in the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (missing field, non-positive quantity, from == to).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced entity does not exist in the caller's tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transition from a status that does not permit it, stale version, or a
    /// unique-constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A movement would drive on-hand below zero.
    #[error(
        "insufficient stock for item {item_id} at location {location_id} \
         (on hand: {on_hand}, requested: {requested})"
    )]
    InsufficientStock {
        item_id: AggregateId,
        location_id: AggregateId,
        on_hand: i64,
        requested: i64,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Machine-readable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) | DomainError::InvalidId(_) => "VALIDATION_ERROR",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::Conflict(_) => "CONFLICT",
            DomainError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
        }
    }
}
