//! Channel provisioning.
//!
//! A channel's id is derived from the entity it is tied to, so provisioning
//! is a find-or-create keyed on that id and can be repeated safely.

use tracing::info;

use lexbridge_shared::types::{
    CaseId, CaseKind, ChannelId, ChannelStatus, ConnectionStatus, UserId,
};
use lexbridge_store::{Case, Channel, ChannelTie, StoreHandle};

use crate::error::{CaseError, Result};

/// What a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEntity {
    Case { kind: CaseKind, id: CaseId },
    Direct { a: UserId, b: UserId },
}

impl ChannelEntity {
    fn tie(&self) -> ChannelTie {
        match *self {
            ChannelEntity::Case { kind, id } => ChannelTie::Case { kind, case_id: id },
            ChannelEntity::Direct { .. } => ChannelTie::Direct,
        }
    }
}

/// The stable id of the channel tied to `entity`.
pub fn channel_id_for(entity: &ChannelEntity) -> ChannelId {
    match *entity {
        ChannelEntity::Case { kind, id } => ChannelId::for_case(kind, id),
        ChannelEntity::Direct { a, b } => ChannelId::for_direct(a, b),
    }
}

#[derive(Clone)]
pub struct Provisioner {
    store: StoreHandle,
}

impl Provisioner {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Find or create the channel for `entity`.
    ///
    /// Missing participants are added to an existing channel, and a pending
    /// channel becomes active when `status` is active.
    pub async fn ensure_channel(
        &self,
        entity: ChannelEntity,
        participants: Vec<UserId>,
        status: ChannelStatus,
    ) -> Result<Channel> {
        let id = channel_id_for(&entity);
        let draft = Channel::draft(id, entity.tie(), status, participants);

        let (channel, created) = self.store.call(move |db| db.ensure_channel(&draft)).await?;
        if created {
            info!(channel = %channel.id, status = %channel.status, "channel created");
        }
        Ok(channel)
    }

    /// The active channel between an assigned case's owner and its lawyer.
    pub async fn provision_case_channel(&self, case: &Case) -> Result<Channel> {
        let lawyer = case.assigned_lawyer.ok_or(CaseError::NotAvailable)?;
        self.ensure_channel(
            ChannelEntity::Case {
                kind: case.kind,
                id: case.id,
            },
            vec![case.owner, lawyer],
            ChannelStatus::Active,
        )
        .await
    }

    /// The active channel for an accepted direct connection.
    pub async fn provision_direct_channel(&self, citizen: UserId, lawyer: UserId) -> Result<Channel> {
        self.ensure_channel(
            ChannelEntity::Direct { a: citizen, b: lawyer },
            vec![citizen, lawyer],
            ChannelStatus::Active,
        )
        .await
    }

    /// Open a direct chat without going through a connection request.
    ///
    /// The channel is active if the two already have an accepted connection
    /// and pending otherwise; accepting a connection later activates the
    /// same channel.
    pub async fn open_direct_chat(&self, initiator: UserId, counterpart: UserId) -> Result<Channel> {
        if initiator == counterpart {
            return Err(CaseError::InvalidInput("cannot open a chat with yourself".into()));
        }

        let existing = self
            .store
            .call(move |db| db.find_connection_between(initiator, counterpart))
            .await?;

        let status = match existing.map(|c| c.status) {
            Some(ConnectionStatus::Blocked) => return Err(CaseError::Blocked),
            Some(ConnectionStatus::Accepted) => ChannelStatus::Active,
            _ => ChannelStatus::Pending,
        };

        self.ensure_channel(
            ChannelEntity::Direct {
                a: initiator,
                b: counterpart,
            },
            vec![initiator, counterpart],
            status,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexbridge_store::DirectConnection;

    #[test]
    fn ids_are_pure_functions_of_the_entity() {
        let id = CaseId::new();
        let entity = ChannelEntity::Case {
            kind: CaseKind::Query,
            id,
        };
        assert_eq!(channel_id_for(&entity), channel_id_for(&entity));
        assert_eq!(channel_id_for(&entity).as_str(), format!("query_{id}"));

        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(
            channel_id_for(&ChannelEntity::Direct { a, b }),
            channel_id_for(&ChannelEntity::Direct { a: b, b: a })
        );
    }

    #[tokio::test]
    async fn ensure_never_duplicates() {
        let store = StoreHandle::in_memory().unwrap();
        let provisioner = Provisioner::new(store.clone());
        let a = UserId::new();
        let b = UserId::new();

        let first = provisioner.provision_direct_channel(a, b).await.unwrap();
        let second = provisioner.provision_direct_channel(b, a).await.unwrap();
        assert_eq!(first.id, second.id);

        let count: i64 = store
            .call(|db| {
                Ok(db
                    .conn()
                    .query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn unsolicited_chat_is_pending_until_accepted() {
        let store = StoreHandle::in_memory().unwrap();
        let provisioner = Provisioner::new(store.clone());
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let chat = provisioner.open_direct_chat(citizen, lawyer).await.unwrap();
        assert_eq!(chat.status, ChannelStatus::Pending);

        let activated = provisioner.provision_direct_channel(citizen, lawyer).await.unwrap();
        assert_eq!(activated.id, chat.id);
        assert_eq!(activated.status, ChannelStatus::Active);
    }

    #[tokio::test]
    async fn blocked_pair_cannot_chat() {
        let store = StoreHandle::in_memory().unwrap();
        let provisioner = Provisioner::new(store.clone());
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let mut conn = DirectConnection::new(citizen, lawyer, "Hi");
        conn.status = ConnectionStatus::Blocked;
        store.call(move |db| db.insert_connection(&conn)).await.unwrap();

        assert!(matches!(
            provisioner.open_direct_chat(lawyer, citizen).await,
            Err(CaseError::Blocked)
        ));
        assert!(matches!(
            provisioner.open_direct_chat(citizen, citizen).await,
            Err(CaseError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unassigned_case_has_no_channel() {
        let store = StoreHandle::in_memory().unwrap();
        let provisioner = Provisioner::new(store);
        let case = Case::new(CaseKind::Dispute, UserId::new(), "Boundary wall");
        assert!(matches!(
            provisioner.provision_case_channel(&case).await,
            Err(CaseError::NotAvailable)
        ));
    }
}
