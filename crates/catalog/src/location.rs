use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, Entity, TenantId, typed_id};

use crate::{normalize_code, required};

typed_id!(
    /// Stock location identifier (warehouse, store, bin).
    LocationId
);

/// A place where stock is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub active: bool,
}

impl Location {
    pub fn new(tenant_id: TenantId, id: LocationId, code: &str, name: &str) -> DomainResult<Self> {
        Ok(Self {
            id,
            tenant_id,
            code: normalize_code("location code", code)?,
            name: required("location name", name)?,
            active: true,
        })
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn reactivate(&mut self) {
        self.active = true;
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_uppercased_and_must_not_contain_spaces() {
        let loc = Location::new(TenantId::new(), LocationId::generate(), "wh-1", "Main").unwrap();
        assert_eq!(loc.code, "WH-1");
        assert!(loc.active);

        assert!(Location::new(TenantId::new(), LocationId::generate(), "wh 1", "Main").is_err());
    }
}
