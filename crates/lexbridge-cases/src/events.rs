//! Domain events emitted by the matcher and the connection desk.
//!
//! Events are pushed onto an unbounded queue after the state change they
//! describe has been committed. The server drains the queue and turns each
//! event into pushes to the affected users' personal rooms.

use tokio::sync::mpsc;
use uuid::Uuid;

use lexbridge_shared::types::{CaseId, CaseKind, ChannelId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A proposal was accepted and the case now has a lawyer.
    /// `channel_id` is `None` if provisioning failed after the commit.
    CaseAssigned {
        case_id: CaseId,
        case_kind: CaseKind,
        proposal_id: Uuid,
        citizen: UserId,
        lawyer: UserId,
        channel_id: Option<ChannelId>,
    },
    ProposalSubmitted {
        case_id: CaseId,
        proposal_id: Uuid,
        proposer: UserId,
        counterpart: UserId,
    },
    /// Explicitly rejected by the counterpart, or swept aside when a sibling
    /// proposal was accepted (`by` is then the accepting actor).
    ProposalRejected {
        case_id: CaseId,
        proposal_id: Uuid,
        proposer: UserId,
        by: UserId,
    },
    ConnectionRequested {
        connection_id: Uuid,
        citizen: UserId,
        lawyer: UserId,
        message: String,
    },
    ConnectionAccepted {
        connection_id: Uuid,
        citizen: UserId,
        lawyer: UserId,
        channel_id: Option<ChannelId>,
        message: Option<String>,
    },
    ConnectionRejected {
        connection_id: Uuid,
        citizen: UserId,
        lawyer: UserId,
        message: Option<String>,
    },
    ConnectionBlocked {
        connection_id: Uuid,
        citizen: UserId,
        lawyer: UserId,
        by: UserId,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::CaseAssigned { .. } => "case_assigned",
            DomainEvent::ProposalSubmitted { .. } => "proposal_submitted",
            DomainEvent::ProposalRejected { .. } => "proposal_rejected",
            DomainEvent::ConnectionRequested { .. } => "connection_requested",
            DomainEvent::ConnectionAccepted { .. } => "connection_accepted",
            DomainEvent::ConnectionRejected { .. } => "connection_rejected",
            DomainEvent::ConnectionBlocked { .. } => "connection_blocked",
        }
    }
}

/// Sending half of the domain event queue.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventPublisher {
    /// A publisher together with the receiver the consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event. With no consumer left the event is dropped.
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::warn!(event = name, "no event consumer, dropping domain event");
        } else {
            tracing::debug!(event = name, "domain event published");
        }
    }
}
