//! Caller context supplied by the identity/session collaborator.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Coarse caller role. Authorization decisions are made outside this
/// workspace; the role is carried for audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Clerk,
    Viewer,
}

/// Validated `(tenant, user, role)` triple for one call.
///
/// The core trusts this value; it performs no authentication itself. Every
/// query and mutation is scoped to `tenant_id`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    tenant_id: TenantId,
    user_id: UserId,
    role: Role,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: Role) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}
