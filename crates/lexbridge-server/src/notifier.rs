//! Turns committed domain events into pushes to personal rooms.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use lexbridge_cases::DomainEvent;
use lexbridge_shared::protocol::{ChannelReady, ConnectionUpdate, ProposalUpdate, ServerEvent};
use lexbridge_shared::types::{ConnectionStatus, ProposalStatus, UserId};

use crate::gateway::Gateway;

/// Drain the domain event queue until every publisher is gone.
pub fn spawn_notifier(
    gateway: Gateway,
    mut events: mpsc::UnboundedReceiver<DomainEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            for (user, push) in pushes(&event) {
                let delivered = gateway.notify_user(user, &push).await;
                debug!(event = event.name(), user = %user, delivered, "Pushed domain event");
            }
        }
        info!("Domain event queue closed, notifier stopping");
    })
}

/// Who hears about an event, and what they receive.
pub fn pushes(event: &DomainEvent) -> Vec<(UserId, ServerEvent)> {
    match event {
        DomainEvent::CaseAssigned {
            case_id,
            proposal_id,
            citizen,
            lawyer,
            channel_id,
            ..
        } => {
            let mut out = Vec::with_capacity(4);
            for (user, other) in [(*citizen, *lawyer), (*lawyer, *citizen)] {
                out.push((
                    user,
                    ServerEvent::ProposalUpdate(ProposalUpdate {
                        case_id: *case_id,
                        proposal_id: *proposal_id,
                        status: ProposalStatus::Accepted,
                        from: other,
                    }),
                ));
                if let Some(channel_id) = channel_id {
                    out.push((
                        user,
                        ServerEvent::ChannelReady(ChannelReady {
                            channel_id: channel_id.clone(),
                            case_id: Some(*case_id),
                            connection_id: None,
                            counterpart: other,
                        }),
                    ));
                }
            }
            out
        }

        DomainEvent::ProposalSubmitted {
            case_id,
            proposal_id,
            proposer,
            counterpart,
        } => vec![(
            *counterpart,
            ServerEvent::ProposalUpdate(ProposalUpdate {
                case_id: *case_id,
                proposal_id: *proposal_id,
                status: ProposalStatus::Pending,
                from: *proposer,
            }),
        )],

        DomainEvent::ProposalRejected {
            case_id,
            proposal_id,
            proposer,
            by,
        } => vec![(
            *proposer,
            ServerEvent::ProposalUpdate(ProposalUpdate {
                case_id: *case_id,
                proposal_id: *proposal_id,
                status: ProposalStatus::Rejected,
                from: *by,
            }),
        )],

        DomainEvent::ConnectionRequested {
            connection_id,
            citizen,
            lawyer,
            message,
        } => vec![(
            *lawyer,
            connection_update(*connection_id, ConnectionStatus::Pending, *citizen, Some(message.clone())),
        )],

        DomainEvent::ConnectionAccepted {
            connection_id,
            citizen,
            lawyer,
            channel_id,
            message,
        } => {
            let mut out = vec![(
                *citizen,
                connection_update(*connection_id, ConnectionStatus::Accepted, *lawyer, message.clone()),
            )];
            if let Some(channel_id) = channel_id {
                for (user, other) in [(*citizen, *lawyer), (*lawyer, *citizen)] {
                    out.push((
                        user,
                        ServerEvent::ChannelReady(ChannelReady {
                            channel_id: channel_id.clone(),
                            case_id: None,
                            connection_id: Some(*connection_id),
                            counterpart: other,
                        }),
                    ));
                }
            }
            out
        }

        DomainEvent::ConnectionRejected {
            connection_id,
            citizen,
            lawyer,
            message,
        } => vec![(
            *citizen,
            connection_update(*connection_id, ConnectionStatus::Rejected, *lawyer, message.clone()),
        )],

        DomainEvent::ConnectionBlocked {
            connection_id,
            citizen,
            lawyer,
            by,
        } => {
            let other = if by == citizen { *lawyer } else { *citizen };
            vec![(
                other,
                connection_update(*connection_id, ConnectionStatus::Blocked, *by, None),
            )]
        }
    }
}

fn connection_update(
    connection_id: uuid::Uuid,
    status: ConnectionStatus,
    from: UserId,
    message: Option<String>,
) -> ServerEvent {
    ServerEvent::ConnectionUpdate(ConnectionUpdate {
        connection_id,
        status,
        from,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexbridge_shared::types::{CaseId, CaseKind, ChannelId};
    use uuid::Uuid;

    #[test]
    fn assignment_reaches_both_parties() {
        let (citizen, lawyer) = (UserId::new(), UserId::new());
        let case_id = CaseId::new();
        let channel_id = ChannelId::for_case(CaseKind::Query, case_id);
        let event = DomainEvent::CaseAssigned {
            case_id,
            case_kind: CaseKind::Query,
            proposal_id: Uuid::new_v4(),
            citizen,
            lawyer,
            channel_id: Some(channel_id.clone()),
        };

        let out = pushes(&event);
        assert_eq!(out.len(), 4);
        assert!(out.iter().any(|(u, e)| *u == lawyer
            && matches!(e, ServerEvent::ChannelReady(r) if r.channel_id == channel_id && r.counterpart == citizen)));
        assert!(out.iter().any(|(u, e)| *u == citizen
            && matches!(e, ServerEvent::ProposalUpdate(p) if p.status == ProposalStatus::Accepted)));

        let without_channel = DomainEvent::CaseAssigned {
            case_id,
            case_kind: CaseKind::Query,
            proposal_id: Uuid::new_v4(),
            citizen,
            lawyer,
            channel_id: None,
        };
        assert_eq!(pushes(&without_channel).len(), 2);
    }

    #[test]
    fn block_notifies_the_other_party() {
        let (citizen, lawyer) = (UserId::new(), UserId::new());
        let event = DomainEvent::ConnectionBlocked {
            connection_id: Uuid::new_v4(),
            citizen,
            lawyer,
            by: lawyer,
        };
        let out = pushes(&event);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, citizen);
    }

    #[test]
    fn rejection_goes_to_the_proposer() {
        let (proposer, by) = (UserId::new(), UserId::new());
        let event = DomainEvent::ProposalRejected {
            case_id: CaseId::new(),
            proposal_id: Uuid::new_v4(),
            proposer,
            by,
        };
        assert!(matches!(
            pushes(&event).as_slice(),
            [(u, ServerEvent::ProposalUpdate(p))] if *u == proposer && p.from == by
        ));
    }

    #[tokio::test]
    async fn notifier_delivers_to_live_sessions() {
        use std::sync::Arc;
        use std::time::Duration;

        use ed25519_dalek::SigningKey;
        use lexbridge_cases::EventPublisher;
        use lexbridge_shared::identity::Identity;
        use lexbridge_shared::types::Role;
        use lexbridge_store::StoreHandle;
        use rand::rngs::OsRng;

        use crate::identity::TokenVerifier;
        use crate::rate_limit::RateLimiter;

        let key = SigningKey::generate(&mut OsRng);
        let gateway = Gateway::new(
            Arc::new(TokenVerifier::new(key.verifying_key().to_bytes())),
            StoreHandle::in_memory().unwrap(),
            RateLimiter::new(30, Duration::from_secs(60)),
        );
        let lawyer = UserId::new();
        let (_session, mut rx) = gateway
            .register(Identity { user_id: lawyer, role: Role::Lawyer, active: true })
            .await;
        assert!(matches!(rx.recv().await, Some(ServerEvent::Connected(_))));

        let (publisher, events) = EventPublisher::channel();
        let handle = spawn_notifier(gateway.clone(), events);
        publisher.publish(DomainEvent::ConnectionRequested {
            connection_id: Uuid::new_v4(),
            citizen: UserId::new(),
            lawyer,
            message: "Hi".into(),
        });

        let pushed = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(
            pushed,
            Some(ServerEvent::ConnectionUpdate(u)) if u.status == ConnectionStatus::Pending && u.message.as_deref() == Some("Hi")
        ));

        drop(publisher);
        handle.await.unwrap();
    }
}
