//! Post-commit publication.
//!
//! Envelopes are collected while a transaction is open and handed to the bus
//! only after `commit` returned. A publish failure is logged and dropped: the
//! movement log and the audit table are the source of truth, consumers
//! catch up from there.

use serde_json::Value as JsonValue;
use tracing::warn;

use stockledger_core::TenantId;
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_ledger::{LedgerEvent, StockMovement};
use stockledger_workflows::{DocumentHeader, WorkflowEvent};

use crate::error::ServiceResult;

pub(crate) const LEVEL_AGGREGATE_TYPE: &str = "ledger.inventory_level";

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    envelopes: Vec<EventEnvelope<JsonValue>>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stream: the item's level at one location; sequence: level version.
    pub(crate) fn movement(&mut self, movement: &StockMovement, level_version: u64) -> ServiceResult<()> {
        let envelope = EventEnvelope::from_typed(
            movement.tenant_id,
            movement.item_id.as_aggregate_id(),
            LEVEL_AGGREGATE_TYPE,
            level_version,
            &LedgerEvent::StockMoved(movement.clone()),
        )?;
        self.envelopes.push(envelope);
        Ok(())
    }

    /// Stream: the document; sequence: document version.
    pub(crate) fn document(&mut self, header: &DocumentHeader, event: &WorkflowEvent) -> ServiceResult<()> {
        let envelope = EventEnvelope::from_typed(
            header.tenant_id,
            header.id.as_aggregate_id(),
            header.kind.as_str(),
            header.version,
            event,
        )?;
        self.envelopes.push(envelope);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Publish everything. Call only after the transaction committed.
    pub(crate) fn flush<B>(self, tenant_id: TenantId, bus: &B)
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        for envelope in self.envelopes {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = bus.publish(envelope) {
                warn!(%tenant_id, %event_type, error = ?err, "failed to publish committed event");
            }
        }
    }
}
