//! Service-level error type.

use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::StoreError;

/// Error returned by every service and query entry point.
///
/// `Domain` carries deterministic business failures unchanged. `Internal`
/// covers store and serialization failures; the operation rolled back and is
/// safe to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Machine-readable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(e) => e.code(),
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Domain(DomainError::Conflict(_)))
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => ServiceError::Domain(DomainError::Conflict(msg)),
            StoreError::Backend(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(value: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization failed: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_surface_as_domain_conflicts() {
        let err: ServiceError = StoreError::Conflict("sku taken".into()).into();
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.is_conflict());
    }

    #[test]
    fn backend_failures_are_internal() {
        let err: ServiceError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.to_string(), "internal error: connection reset");
    }
}
