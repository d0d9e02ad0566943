//! # lexbridge-cases
//!
//! The matching side of LexBridge: lawyer offers and citizen requests on a
//! case, standing direct connections between a citizen and a lawyer, and the
//! provisioning of the chat channel that an accepted match opens.
//!
//! Every state change is a re-read/modify/write against the store, guarded
//! by the record's version. Results of interest to live clients leave the
//! crate as [`DomainEvent`]s on an [`EventPublisher`] queue; nothing here
//! knows about sessions or sockets.

pub mod connections;
pub mod error;
pub mod events;
pub mod matcher;
pub mod provisioner;

pub use connections::{ConnectionAction, ConnectionDesk, ConnectionOutcome};
pub use error::{CaseError, Result};
pub use events::{DomainEvent, EventPublisher};
pub use matcher::{Matcher, ProposalAction, RespondOutcome};
pub use provisioner::{channel_id_for, ChannelEntity, Provisioner};
