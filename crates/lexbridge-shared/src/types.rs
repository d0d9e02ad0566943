use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DIRECT_CHANNEL_PREFIX, PERSONAL_ROOM_PREFIX};
use crate::error::ParseEnumError;

// User identity as issued by the identity provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Name of the personal notification room every session of this user joins.
    pub fn personal_room(&self) -> String {
        format!("{PERSONAL_ROOM_PREFIX}{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message channel.
///
/// Derived from the entity the channel is tied to and persisted verbatim, so
/// the string form is part of the external contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// `<kind>_<case id>`, e.g. `query_0b6f…`.
    pub fn for_case(kind: CaseKind, case_id: CaseId) -> Self {
        Self(format!("{}_{}", kind.as_str(), case_id.0))
    }

    /// `direct_<lower id>_<higher id>`; argument order does not matter.
    pub fn for_direct(a: UserId, b: UserId) -> Self {
        let (lo, hi) = if a.to_string() <= b.to_string() { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_CHANNEL_PREFIX}_{lo}_{hi}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Implements `as_str` / `FromStr` / `Display` for a fieldless enum with a
/// fixed lowercase wire name per variant.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Lawyer,
    Admin,
}

wire_enum!(Role {
    Citizen => "citizen",
    Lawyer => "lawyer",
    Admin => "admin",
});

/// Which flavour of case a record is. Queries and disputes share one state
/// machine; the kind only shows up in channel ids and listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CaseKind {
    Query,
    Dispute,
}

wire_enum!(CaseKind {
    Query => "query",
    Dispute => "dispute",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    System,
}

wire_enum!(MessageKind {
    Text => "text",
    File => "file",
    System => "system",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
    Closed,
}

wire_enum!(CaseStatus {
    Pending => "pending",
    Assigned => "assigned",
    InProgress => "in_progress",
    Resolved => "resolved",
    Closed => "closed",
});

impl CaseStatus {
    /// Whether a case in this status must carry an assigned lawyer.
    pub fn requires_lawyer(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Direction of a proposal: a lawyer offering to take a case, or a citizen
/// asking a specific lawyer to take it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    LawyerOffer,
    CitizenRequest,
}

wire_enum!(ProposalKind {
    LawyerOffer => "lawyer_offer",
    CitizenRequest => "citizen_request",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

wire_enum!(ProposalStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
    Blocked,
}

wire_enum!(ConnectionStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Blocked => "blocked",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Pending,
    Active,
}

wire_enum!(ChannelStatus {
    Pending => "pending",
    Active => "active",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}
