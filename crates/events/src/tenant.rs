use stockledger_core::TenantId;

use crate::{AuditRecord, EventEnvelope};

/// Messages that belong to exactly one tenant.
///
/// Consumers pinned to a tenant use this to drop anything else.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;

    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}

impl TenantScoped for AuditRecord {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
