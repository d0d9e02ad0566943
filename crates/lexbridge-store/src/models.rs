//! Records persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so the HTTP layer can
//! hand it out directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lexbridge_shared::protocol::MessagePayload;
use lexbridge_shared::types::{
    CaseId, CaseKind, CaseStatus, ChannelId, ChannelStatus, ConnectionStatus, MessageKind,
    ProposalKind, ProposalStatus, UserId,
};

// ---------------------------------------------------------------------------
// Case
// ---------------------------------------------------------------------------

/// A query or dispute owned by a citizen.
///
/// `version` is bumped by every successful [`Database::save_case`] and is the
/// token for optimistic concurrency.
///
/// [`Database::save_case`]: crate::Database::save_case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Case {
    pub id: CaseId,
    pub kind: CaseKind,
    pub owner: UserId,
    pub title: String,
    pub assigned_lawyer: Option<UserId>,
    pub status: CaseStatus,
    pub offers: Vec<Proposal>,
    pub requests: Vec<Proposal>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn new(kind: CaseKind, owner: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CaseId::new(),
            kind,
            owner,
            title: title.into(),
            assigned_lawyer: None,
            status: CaseStatus::Pending,
            offers: Vec::new(),
            requests: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Offers first, then requests.
    pub fn proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.offers.iter().chain(self.requests.iter())
    }

    pub fn proposals_mut(&mut self) -> impl Iterator<Item = &mut Proposal> {
        self.offers.iter_mut().chain(self.requests.iter_mut())
    }

    pub fn proposal(&self, id: Uuid) -> Option<&Proposal> {
        self.proposals().find(|p| p.id == id)
    }

    pub fn proposal_mut(&mut self, id: Uuid) -> Option<&mut Proposal> {
        self.proposals_mut().find(|p| p.id == id)
    }

    /// Whether the case takes new proposals at all.
    pub fn is_open(&self) -> bool {
        self.assigned_lawyer.is_none() && self.status == CaseStatus::Pending
    }

    pub fn channel_id(&self) -> ChannelId {
        ChannelId::for_case(self.kind, self.id)
    }

    /// Assignment invariants: a lawyer is set exactly when the status says
    /// so, at most one proposal is accepted, and an accepted proposal names
    /// the assigned lawyer.
    pub fn invariants_hold(&self) -> bool {
        let accepted: Vec<&Proposal> = self
            .proposals()
            .filter(|p| p.status == ProposalStatus::Accepted)
            .collect();

        if accepted.len() > 1 {
            return false;
        }
        if self.assigned_lawyer.is_some() != self.status.requires_lawyer() {
            return false;
        }
        match accepted.first() {
            Some(p) => self.assigned_lawyer == Some(p.lawyer()),
            None => true,
        }
    }
}

/// A lawyer's offer or a citizen's request about one case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: Uuid,
    pub kind: ProposalKind,
    pub proposer: UserId,
    /// The party who has to answer.
    pub counterpart: UserId,
    pub message: String,
    pub status: ProposalStatus,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn new(kind: ProposalKind, proposer: UserId, counterpart: UserId, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            proposer,
            counterpart,
            message: message.into(),
            status: ProposalStatus::Pending,
            requested_at: Utc::now(),
            responded_at: None,
        }
    }

    /// The lawyer this proposal would assign.
    pub fn lawyer(&self) -> UserId {
        match self.kind {
            ProposalKind::LawyerOffer => self.proposer,
            ProposalKind::CitizenRequest => self.counterpart,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// Move to a terminal status. Returns `false` if it already was terminal.
    pub fn resolve(&mut self, status: ProposalStatus, at: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = status;
        self.responded_at = Some(at);
        true
    }
}

// ---------------------------------------------------------------------------
// Direct connection
// ---------------------------------------------------------------------------

/// A standing consultation request between a citizen and a lawyer.
///
/// There is at most one row per (citizen, lawyer) pair; a rejected request is
/// reopened in place and `Blocked` never changes again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectConnection {
    pub id: Uuid,
    pub citizen: UserId,
    pub lawyer: UserId,
    pub status: ConnectionStatus,
    pub message: String,
    pub response_message: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub version: i64,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl DirectConnection {
    pub fn new(citizen: UserId, lawyer: UserId, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            citizen,
            lawyer,
            status: ConnectionStatus::Pending,
            message: message.into(),
            response_message: None,
            channel_id: None,
            version: 0,
            requested_at: Utc::now(),
            responded_at: None,
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.citizen == user || self.lawyer == user
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// What a channel hangs off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelTie {
    Case { kind: CaseKind, case_id: CaseId },
    Direct,
}

impl ChannelTie {
    pub(crate) fn kind_str(&self) -> &'static str {
        match self {
            ChannelTie::Case { kind, .. } => kind.as_str(),
            ChannelTie::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub tie: ChannelTie,
    pub status: ChannelStatus,
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn has_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadMarker {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// A chat message. Content never changes after insert; only read markers grow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: ChannelId,
    /// Position within the channel, assigned at insert.
    pub seq: i64,
    pub sender: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub file_ref: Option<String>,
    pub read_by: Vec<ReadMarker>,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn to_payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            channel_id: self.channel_id.clone(),
            seq: self.seq,
            sender: self.sender,
            kind: self.kind,
            content: self.content.clone(),
            file_ref: self.file_ref.clone(),
            read_by: self.read_by.iter().map(|r| r.user_id).collect(),
            sent_at: self.sent_at,
        }
    }
}

/// A message about to be appended; the store assigns id, seq and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: ChannelId,
    pub sender: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub file_ref: Option<String>,
}
