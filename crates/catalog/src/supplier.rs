use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, Entity, TenantId, typed_id};

use crate::{normalize_code, required};

typed_id!(
    /// Supplier identifier.
    SupplierId
);

/// Vendor that purchase orders are placed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
}

impl Supplier {
    pub fn new(
        tenant_id: TenantId,
        id: SupplierId,
        code: &str,
        name: &str,
        email: Option<String>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            tenant_id,
            code: normalize_code("supplier code", code)?,
            name: required("supplier name", name)?,
            email: email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
            active: true,
        })
    }
}

impl Entity for Supplier {
    type Id = SupplierId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
