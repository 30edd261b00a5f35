use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::UserId;
use stockledger_events::Event;

use crate::document::{DocumentHeader, DocumentId};
use crate::status::{Action, DocumentKind, DocumentStatus};

/// Summary of a committed document change, published after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChanged {
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub number: String,
    pub from: Option<DocumentStatus>,
    pub to: DocumentStatus,
    pub version: u64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Created(DocumentChanged),
    LinesReplaced(DocumentChanged),
    Transitioned {
        action: Action,
        change: DocumentChanged,
    },
}

impl WorkflowEvent {
    pub fn created(header: &DocumentHeader, actor: UserId) -> Self {
        WorkflowEvent::Created(DocumentChanged::snapshot(header, None, actor))
    }

    pub fn lines_replaced(header: &DocumentHeader, actor: UserId) -> Self {
        WorkflowEvent::LinesReplaced(DocumentChanged::snapshot(header, Some(header.status), actor))
    }

    pub fn transitioned(
        header: &DocumentHeader,
        action: Action,
        from: DocumentStatus,
        actor: UserId,
    ) -> Self {
        WorkflowEvent::Transitioned {
            action,
            change: DocumentChanged::snapshot(header, Some(from), actor),
        }
    }

    pub fn change(&self) -> &DocumentChanged {
        match self {
            WorkflowEvent::Created(c) | WorkflowEvent::LinesReplaced(c) => c,
            WorkflowEvent::Transitioned { change, .. } => change,
        }
    }
}

impl DocumentChanged {
    fn snapshot(header: &DocumentHeader, from: Option<DocumentStatus>, actor: UserId) -> Self {
        Self {
            document_id: header.id,
            kind: header.kind,
            number: header.number.clone(),
            from,
            to: header.status,
            version: header.version,
            actor,
            occurred_at: header.updated_at,
        }
    }
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::Created(_) => "workflow.document.created",
            WorkflowEvent::LinesReplaced(_) => "workflow.document.lines_replaced",
            WorkflowEvent::Transitioned { .. } => "workflow.document.transitioned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.change().occurred_at
    }
}
