//! Direct consultation requests between a citizen and a lawyer, outside of
//! any case.
//!
//! A pair has at most one connection row. A rejected request can be sent
//! again, which reopens the same row; a blocked one stays blocked.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lexbridge_shared::constants::{MAX_CONFLICT_RETRIES, MAX_MESSAGE_CHARS};
use lexbridge_shared::types::{ChannelId, ConnectionStatus, UserId};
use lexbridge_store::{Channel, DirectConnection, StoreError, StoreHandle};

use crate::error::{CaseError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::provisioner::Provisioner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub connection: DirectConnection,
    /// Set on accept once the direct channel exists.
    pub channel: Option<Channel>,
}

#[derive(Clone)]
pub struct ConnectionDesk {
    store: StoreHandle,
    provisioner: Provisioner,
    events: EventPublisher,
    max_retries: u32,
}

impl ConnectionDesk {
    pub fn new(store: StoreHandle, events: EventPublisher) -> Self {
        Self {
            provisioner: Provisioner::new(store.clone()),
            store,
            events,
            max_retries: MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// A citizen asks a lawyer for a direct consultation.
    pub async fn request(&self, citizen: UserId, lawyer: UserId, message: &str) -> Result<DirectConnection> {
        if citizen == lawyer {
            return Err(CaseError::InvalidInput("cannot connect to yourself".into()));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(CaseError::InvalidInput(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        for attempt in 0..=self.max_retries {
            let written = match self.find_for_pair(citizen, lawyer).await? {
                None => {
                    let conn = DirectConnection::new(citizen, lawyer, message);
                    let stored = conn.clone();
                    self.store
                        .call(move |db| db.insert_connection(&stored))
                        .await
                        .map(|()| conn)
                }
                Some(mut conn) => {
                    match conn.status {
                        ConnectionStatus::Pending => return Err(CaseError::AlreadyOffered),
                        ConnectionStatus::Accepted => return Err(CaseError::AlreadyResolved),
                        ConnectionStatus::Blocked => return Err(CaseError::Blocked),
                        ConnectionStatus::Rejected => {}
                    }
                    let expected = conn.version;
                    conn.status = ConnectionStatus::Pending;
                    conn.message = message.to_string();
                    conn.response_message = None;
                    conn.requested_at = Utc::now();
                    conn.responded_at = None;
                    let stored = conn.clone();
                    self.store
                        .call(move |db| db.save_connection(&stored, expected))
                        .await
                        .map(|version| DirectConnection { version, ..conn })
                }
            };

            match written {
                Ok(conn) => {
                    info!(connection = %conn.id, citizen = %citizen, lawyer = %lawyer, "connection requested");
                    self.events.publish(DomainEvent::ConnectionRequested {
                        connection_id: conn.id,
                        citizen,
                        lawyer,
                        message: conn.message.clone(),
                    });
                    return Ok(conn);
                }
                Err(StoreError::Conflict { .. } | StoreError::Duplicate) => {
                    debug!(citizen = %citizen, lawyer = %lawyer, attempt, "connection raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CaseError::Conflict)
    }

    /// The lawyer answers a pending request. Accepting activates the
    /// `direct_<a>_<b>` channel and records its id on the connection.
    pub async fn respond(
        &self,
        connection_id: Uuid,
        lawyer: UserId,
        action: ConnectionAction,
        response_message: Option<String>,
    ) -> Result<ConnectionOutcome> {
        let connection = self
            .update_connection(connection_id, |conn| {
                if conn.lawyer != lawyer {
                    return Err(CaseError::Forbidden("only the requested lawyer can respond"));
                }
                match conn.status {
                    ConnectionStatus::Pending => {}
                    ConnectionStatus::Blocked => return Err(CaseError::Blocked),
                    _ => return Err(CaseError::AlreadyResolved),
                }
                conn.status = match action {
                    ConnectionAction::Accept => {
                        conn.channel_id = Some(ChannelId::for_direct(conn.citizen, conn.lawyer));
                        ConnectionStatus::Accepted
                    }
                    ConnectionAction::Reject => ConnectionStatus::Rejected,
                };
                conn.response_message = response_message.clone();
                conn.responded_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        match action {
            ConnectionAction::Reject => {
                info!(connection = %connection.id, "connection rejected");
                self.events.publish(DomainEvent::ConnectionRejected {
                    connection_id: connection.id,
                    citizen: connection.citizen,
                    lawyer: connection.lawyer,
                    message: connection.response_message.clone(),
                });
                Ok(ConnectionOutcome {
                    connection,
                    channel: None,
                })
            }
            ConnectionAction::Accept => {
                let channel = match self
                    .provisioner
                    .provision_direct_channel(connection.citizen, connection.lawyer)
                    .await
                {
                    Ok(channel) => Some(channel),
                    Err(e) => {
                        warn!(connection = %connection.id, error = %e, "connection accepted but channel provisioning failed");
                        None
                    }
                };

                info!(connection = %connection.id, "connection accepted");
                self.events.publish(DomainEvent::ConnectionAccepted {
                    connection_id: connection.id,
                    citizen: connection.citizen,
                    lawyer: connection.lawyer,
                    channel_id: channel.as_ref().map(|c| c.id.clone()),
                    message: connection.response_message.clone(),
                });
                Ok(ConnectionOutcome { connection, channel })
            }
        }
    }

    /// Either party blocks the pair for good. Blocking twice is a no-op.
    pub async fn block(&self, connection_id: Uuid, actor: UserId) -> Result<DirectConnection> {
        let current = self.get(connection_id, actor).await?;
        if current.status == ConnectionStatus::Blocked {
            return Ok(current);
        }

        let connection = self
            .update_connection(connection_id, |conn| {
                conn.status = ConnectionStatus::Blocked;
                conn.responded_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        info!(connection = %connection.id, by = %actor, "connection blocked");
        self.events.publish(DomainEvent::ConnectionBlocked {
            connection_id: connection.id,
            citizen: connection.citizen,
            lawyer: connection.lawyer,
            by: actor,
        });
        Ok(connection)
    }

    /// A connection as seen by one of its parties.
    pub async fn get(&self, connection_id: Uuid, actor: UserId) -> Result<DirectConnection> {
        let conn = self.store.call(move |db| db.get_connection(connection_id)).await?;
        if !conn.involves(actor) {
            return Err(CaseError::Forbidden("not a party to this connection"));
        }
        Ok(conn)
    }

    pub async fn find_for_pair(&self, citizen: UserId, lawyer: UserId) -> Result<Option<DirectConnection>> {
        Ok(self
            .store
            .call(move |db| db.find_connection_for_pair(citizen, lawyer))
            .await?)
    }

    async fn update_connection<F>(&self, connection_id: Uuid, mut apply: F) -> Result<DirectConnection>
    where
        F: FnMut(&mut DirectConnection) -> Result<()>,
    {
        for attempt in 0..=self.max_retries {
            let mut conn = self.store.call(move |db| db.get_connection(connection_id)).await?;
            let expected = conn.version;
            apply(&mut conn)?;

            let snapshot = conn.clone();
            match self
                .store
                .call(move |db| db.save_connection(&snapshot, expected))
                .await
            {
                Ok(version) => {
                    conn.version = version;
                    return Ok(conn);
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(connection = %connection_id, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CaseError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexbridge_shared::types::ChannelStatus;
    use tokio::sync::mpsc;

    fn setup() -> (ConnectionDesk, StoreHandle, mpsc::UnboundedReceiver<DomainEvent>) {
        let store = StoreHandle::in_memory().unwrap();
        let (events, rx) = EventPublisher::channel();
        (ConnectionDesk::new(store.clone(), events), store, rx)
    }

    #[tokio::test]
    async fn accepted_request_opens_direct_channel() {
        let (desk, store, mut rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let conn = desk.request(citizen, lawyer, "Hi").await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Pending);

        let outcome = desk
            .respond(conn.id, lawyer, ConnectionAction::Accept, Some("Sure".into()))
            .await
            .unwrap();
        assert_eq!(outcome.connection.status, ConnectionStatus::Accepted);
        assert_eq!(outcome.connection.response_message.as_deref(), Some("Sure"));

        let expected = ChannelId::for_direct(citizen, lawyer);
        assert_eq!(outcome.connection.channel_id.as_ref(), Some(&expected));
        let channel = outcome.channel.unwrap();
        assert_eq!(channel.id, expected);
        assert_eq!(channel.status, ChannelStatus::Active);

        let stored = store.call(move |db| db.get_channel(&expected)).await.unwrap();
        assert!(stored.has_participant(citizen) && stored.has_participant(lawyer));

        assert!(matches!(rx.try_recv(), Ok(DomainEvent::ConnectionRequested { .. })));
        assert!(matches!(
            rx.try_recv(),
            Ok(DomainEvent::ConnectionAccepted { channel_id: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_and_resolved_requests() {
        let (desk, _store, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let conn = desk.request(citizen, lawyer, "Hi").await.unwrap();
        assert!(matches!(
            desk.request(citizen, lawyer, "Hello?").await,
            Err(CaseError::AlreadyOffered)
        ));

        desk.respond(conn.id, lawyer, ConnectionAction::Accept, None).await.unwrap();
        assert!(matches!(
            desk.request(citizen, lawyer, "Again").await,
            Err(CaseError::AlreadyResolved)
        ));
        assert!(matches!(
            desk.respond(conn.id, lawyer, ConnectionAction::Reject, None).await,
            Err(CaseError::AlreadyResolved)
        ));
    }

    #[tokio::test]
    async fn rejected_request_reopens_in_place() {
        let (desk, _store, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let first = desk.request(citizen, lawyer, "Hi").await.unwrap();
        desk.respond(first.id, lawyer, ConnectionAction::Reject, Some("Busy".into()))
            .await
            .unwrap();

        let reopened = desk.request(citizen, lawyer, "Try again").await.unwrap();
        assert_eq!(reopened.id, first.id);
        assert_eq!(reopened.status, ConnectionStatus::Pending);
        assert_eq!(reopened.message, "Try again");
        assert!(reopened.response_message.is_none());
        assert!(reopened.responded_at.is_none());
    }

    #[tokio::test]
    async fn blocked_is_terminal() {
        let (desk, _store, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();

        let conn = desk.request(citizen, lawyer, "Hi").await.unwrap();
        assert!(matches!(
            desk.block(conn.id, UserId::new()).await,
            Err(CaseError::Forbidden(_))
        ));

        let blocked = desk.block(conn.id, lawyer).await.unwrap();
        assert_eq!(blocked.status, ConnectionStatus::Blocked);
        assert_eq!(desk.block(conn.id, citizen).await.unwrap().status, ConnectionStatus::Blocked);

        assert!(matches!(
            desk.request(citizen, lawyer, "Please").await,
            Err(CaseError::Blocked)
        ));
        assert!(matches!(
            desk.respond(conn.id, lawyer, ConnectionAction::Accept, None).await,
            Err(CaseError::Blocked)
        ));
    }

    #[tokio::test]
    async fn only_the_lawyer_responds() {
        let (desk, _store, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let conn = desk.request(citizen, lawyer, "Hi").await.unwrap();

        assert!(matches!(
            desk.respond(conn.id, citizen, ConnectionAction::Accept, None).await,
            Err(CaseError::Forbidden(_))
        ));
        assert!(matches!(
            desk.respond(Uuid::new_v4(), lawyer, ConnectionAction::Accept, None).await,
            Err(CaseError::NotFound)
        ));
        assert!(desk.find_for_pair(citizen, lawyer).await.unwrap().is_some());
        assert!(desk.find_for_pair(lawyer, citizen).await.unwrap().is_none());
    }
}
