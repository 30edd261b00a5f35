//! Audit trail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockledger_core::{TenantId, UserId};

/// What a mutating transition did to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Approve,
    Receive,
    Ship,
    Post,
    Close,
    Cancel,
    /// Side effect of another document's transition (e.g. a goods receipt
    /// advancing its purchase order).
    LinkedUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Approve => "approve",
            AuditAction::Receive => "receive",
            AuditAction::Ship => "ship",
            AuditAction::Post => "post",
            AuditAction::Close => "close",
            AuditAction::Cancel => "cancel",
            AuditAction::LinkedUpdate => "linked_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "approve" => Some(AuditAction::Approve),
            "receive" => Some(AuditAction::Receive),
            "ship" => Some(AuditAction::Ship),
            "post" => Some(AuditAction::Post),
            "close" => Some(AuditAction::Close),
            "cancel" => Some(AuditAction::Cancel),
            "linked_update" => Some(AuditAction::LinkedUpdate),
            _ => None,
        }
    }
}

/// Append-only before/after snapshot of one entity mutation.
///
/// Written in the same transaction as the mutation; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub entity: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub actor: UserId,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        tenant_id: TenantId,
        entity: impl Into<String>,
        entity_id: impl ToString,
        action: AuditAction,
        before: Option<JsonValue>,
        after: Option<JsonValue>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            entity: entity.into(),
            entity_id: entity_id.to_string(),
            action,
            before,
            after,
            actor,
            at,
        }
    }
}
