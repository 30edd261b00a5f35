//! Entity trait: identity + continuity across state changes.

use crate::id::TenantId;

/// Tenant-owned entity with a stable identifier.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Tenant that owns this entity.
    fn tenant_id(&self) -> TenantId;
}
