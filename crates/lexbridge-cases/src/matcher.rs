//! Lawyer offers and citizen requests on a case.
//!
//! Every transition reads the case, applies the change in memory and writes
//! it back guarded by the version it read. Losing that race re-reads and
//! re-applies, so a loser sees the winner's state and fails on its
//! preconditions (typically `AlreadyResolved`). Only when the retries run
//! out does the caller get `Conflict`.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lexbridge_shared::constants::{MAX_CONFLICT_RETRIES, MAX_MESSAGE_CHARS};
use lexbridge_shared::types::{
    CaseId, CaseKind, CaseStatus, ProposalKind, ProposalStatus, UserId,
};
use lexbridge_store::{Case, Channel, Proposal, StoreError, StoreHandle};

use crate::error::{CaseError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::provisioner::Provisioner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalAction {
    Accept,
    Reject,
}

/// Result of [`Matcher::respond`].
#[derive(Debug, Clone)]
pub struct RespondOutcome {
    pub case: Case,
    pub proposal: Proposal,
    /// Set on accept once the case channel exists.
    pub channel: Option<Channel>,
}

#[derive(Clone)]
pub struct Matcher {
    store: StoreHandle,
    provisioner: Provisioner,
    events: EventPublisher,
    max_retries: u32,
}

impl Matcher {
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

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub async fn create_case(&self, kind: CaseKind, owner: UserId, title: &str) -> Result<Case> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CaseError::InvalidInput("title must not be empty".into()));
        }
        let case = Case::new(kind, owner, title);
        let stored = case.clone();
        self.store.call(move |db| db.insert_case(&stored)).await?;
        info!(case = %case.id, kind = %kind, owner = %owner, "case created");
        Ok(case)
    }

    pub async fn get_case(&self, case_id: CaseId) -> Result<Case> {
        Ok(self.store.call(move |db| db.get_case(case_id)).await?)
    }

    /// A lawyer offers to take a case.
    pub async fn submit_offer(&self, case_id: CaseId, lawyer: UserId, message: &str) -> Result<Proposal> {
        check_message(message)?;
        let message = message.to_string();

        let (case, proposal) = self
            .update_case(case_id, |case| {
                if case.owner == lawyer {
                    return Err(CaseError::Forbidden("owner cannot offer on own case"));
                }
                if case.offers.iter().any(|o| o.proposer == lawyer && o.is_pending()) {
                    return Err(CaseError::AlreadyOffered);
                }
                if !case.is_open() {
                    return Err(CaseError::NotAvailable);
                }
                let offer = Proposal::new(ProposalKind::LawyerOffer, lawyer, case.owner, message.clone());
                case.offers.push(offer.clone());
                Ok(offer)
            })
            .await?;

        info!(case = %case.id, proposal = %proposal.id, lawyer = %lawyer, "offer submitted");
        self.events.publish(DomainEvent::ProposalSubmitted {
            case_id: case.id,
            proposal_id: proposal.id,
            proposer: lawyer,
            counterpart: case.owner,
        });
        Ok(proposal)
    }

    /// The case owner asks a specific lawyer to take the case.
    pub async fn submit_request(
        &self,
        case_id: CaseId,
        citizen: UserId,
        lawyer: UserId,
        message: &str,
    ) -> Result<Proposal> {
        check_message(message)?;
        let message = message.to_string();

        let (case, proposal) = self
            .update_case(case_id, |case| {
                if case.owner != citizen {
                    return Err(CaseError::Forbidden("only the case owner can send requests"));
                }
                if lawyer == citizen {
                    return Err(CaseError::InvalidInput("cannot request yourself".into()));
                }
                if case.requests.iter().any(|r| r.counterpart == lawyer && r.is_pending()) {
                    return Err(CaseError::AlreadyOffered);
                }
                if !case.is_open() {
                    return Err(CaseError::NotAvailable);
                }
                let request = Proposal::new(ProposalKind::CitizenRequest, citizen, lawyer, message.clone());
                case.requests.push(request.clone());
                Ok(request)
            })
            .await?;

        info!(case = %case.id, proposal = %proposal.id, lawyer = %lawyer, "request submitted");
        self.events.publish(DomainEvent::ProposalSubmitted {
            case_id: case.id,
            proposal_id: proposal.id,
            proposer: citizen,
            counterpart: lawyer,
        });
        Ok(proposal)
    }

    /// The counterpart of a proposal accepts or rejects it.
    ///
    /// Accepting assigns the proposal's lawyer and rejects every other
    /// pending proposal on the case in the same write, then provisions the
    /// case channel. If provisioning fails after the commit, the outcome
    /// carries no channel; [`Matcher::ensure_case_channel`] repairs that.
    pub async fn respond(
        &self,
        case_id: CaseId,
        proposal_id: Uuid,
        actor: UserId,
        action: ProposalAction,
    ) -> Result<RespondOutcome> {
        let (case, (proposal, swept)) = self
            .update_case(case_id, |case| {
                let proposal = case.proposal(proposal_id).ok_or(CaseError::NotFound)?;
                if proposal.counterpart != actor {
                    return Err(CaseError::Forbidden("only the counterpart can respond"));
                }
                if !proposal.is_pending() {
                    return Err(CaseError::AlreadyResolved);
                }

                let now = Utc::now();
                match action {
                    ProposalAction::Reject => {
                        let proposal = case.proposal_mut(proposal_id).ok_or(CaseError::NotFound)?;
                        proposal.resolve(ProposalStatus::Rejected, now);
                        Ok((proposal.clone(), Vec::new()))
                    }
                    ProposalAction::Accept => {
                        if !case.is_open() {
                            return Err(CaseError::AlreadyResolved);
                        }

                        let mut swept = Vec::new();
                        let mut accepted = None;
                        for p in case.proposals_mut() {
                            if p.id == proposal_id {
                                p.resolve(ProposalStatus::Accepted, now);
                                accepted = Some(p.clone());
                            } else if p.resolve(ProposalStatus::Rejected, now) {
                                swept.push(p.clone());
                            }
                        }
                        let accepted = accepted.ok_or(CaseError::NotFound)?;

                        case.assigned_lawyer = Some(accepted.lawyer());
                        case.status = CaseStatus::Assigned;
                        Ok((accepted, swept))
                    }
                }
            })
            .await?;

        match action {
            ProposalAction::Reject => {
                info!(case = %case.id, proposal = %proposal.id, "proposal rejected");
                self.events.publish(DomainEvent::ProposalRejected {
                    case_id: case.id,
                    proposal_id: proposal.id,
                    proposer: proposal.proposer,
                    by: actor,
                });
                Ok(RespondOutcome {
                    case,
                    proposal,
                    channel: None,
                })
            }
            ProposalAction::Accept => {
                let lawyer = proposal.lawyer();
                info!(
                    case = %case.id,
                    proposal = %proposal.id,
                    lawyer = %lawyer,
                    rejected = swept.len(),
                    "case assigned"
                );

                let channel = match self.provisioner.provision_case_channel(&case).await {
                    Ok(channel) => Some(channel),
                    Err(e) => {
                        warn!(case = %case.id, error = %e, "case assigned but channel provisioning failed");
                        None
                    }
                };

                self.events.publish(DomainEvent::CaseAssigned {
                    case_id: case.id,
                    case_kind: case.kind,
                    proposal_id: proposal.id,
                    citizen: case.owner,
                    lawyer,
                    channel_id: channel.as_ref().map(|c| c.id.clone()),
                });
                for p in &swept {
                    self.events.publish(DomainEvent::ProposalRejected {
                        case_id: case.id,
                        proposal_id: p.id,
                        proposer: p.proposer,
                        by: actor,
                    });
                }

                Ok(RespondOutcome {
                    case,
                    proposal,
                    channel,
                })
            }
        }
    }

    /// Move an assigned case along `assigned -> in_progress -> resolved`, or
    /// close it from any assigned state. Only the owner and the assigned
    /// lawyer may do this.
    pub async fn set_status(&self, case_id: CaseId, actor: UserId, status: CaseStatus) -> Result<Case> {
        let (case, ()) = self
            .update_case(case_id, |case| {
                if actor != case.owner && Some(actor) != case.assigned_lawyer {
                    return Err(CaseError::Forbidden("not a party to this case"));
                }
                let allowed = matches!(
                    (case.status, status),
                    (CaseStatus::Assigned, CaseStatus::InProgress)
                        | (CaseStatus::InProgress, CaseStatus::Resolved)
                        | (
                            CaseStatus::Assigned | CaseStatus::InProgress | CaseStatus::Resolved,
                            CaseStatus::Closed
                        )
                );
                if !allowed {
                    return Err(CaseError::InvalidInput(format!(
                        "cannot move case from {} to {}",
                        case.status, status
                    )));
                }
                case.status = status;
                Ok(())
            })
            .await?;

        info!(case = %case.id, status = %case.status, "case status changed");
        Ok(case)
    }

    /// Re-provision the channel of an assigned case. Idempotent.
    pub async fn ensure_case_channel(&self, case_id: CaseId) -> Result<Channel> {
        let case = self.get_case(case_id).await?;
        self.provisioner.provision_case_channel(&case).await
    }

    /// Bounded re-read/modify/write of one case.
    ///
    /// `apply` runs against a fresh copy on every attempt and may refuse the
    /// change with an error, which is returned as-is.
    async fn update_case<T, F>(&self, case_id: CaseId, mut apply: F) -> Result<(Case, T)>
    where
        F: FnMut(&mut Case) -> Result<T>,
    {
        for attempt in 0..=self.max_retries {
            let mut case = self.get_case(case_id).await?;
            let expected = case.version;
            let out = apply(&mut case)?;

            let snapshot = case.clone();
            match self
                .store
                .call(move |db| db.save_case(&snapshot, expected))
                .await
            {
                Ok(version) => {
                    case.version = version;
                    return Ok((case, out));
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(case = %case_id, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(case = %case_id, retries = self.max_retries, "giving up after repeated conflicts");
        Err(CaseError::Conflict)
    }
}

fn check_message(message: &str) -> Result<()> {
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(CaseError::InvalidInput(format!(
            "message exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexbridge_shared::types::ChannelStatus;
    use tokio::sync::mpsc;

    fn setup() -> (Matcher, mpsc::UnboundedReceiver<DomainEvent>) {
        let store = StoreHandle::in_memory().unwrap();
        let (events, rx) = EventPublisher::channel();
        (Matcher::new(store, events), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DomainEvent>) -> Vec<DomainEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn accepting_one_proposal_rejects_the_others() {
        let (matcher, mut rx) = setup();
        let citizen = UserId::new();
        let l1 = UserId::new();
        let l2 = UserId::new();

        let case = matcher.create_case(CaseKind::Query, citizen, "Unpaid invoice").await.unwrap();
        let request = matcher.submit_request(case.id, citizen, l1, "Please help").await.unwrap();
        let offer = matcher.submit_offer(case.id, l2, "I can take this").await.unwrap();
        drain(&mut rx);

        let outcome = matcher
            .respond(case.id, offer.id, citizen, ProposalAction::Accept)
            .await
            .unwrap();

        let case = matcher.get_case(case.id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Assigned);
        assert_eq!(case.assigned_lawyer, Some(l2));
        assert_eq!(case.proposal(offer.id).unwrap().status, ProposalStatus::Accepted);
        let swept = case.proposal(request.id).unwrap();
        assert_eq!(swept.status, ProposalStatus::Rejected);
        assert!(swept.responded_at.is_some());
        assert!(case.invariants_hold());

        let channel = outcome.channel.unwrap();
        assert_eq!(channel.id.as_str(), format!("query_{}", case.id));
        assert_eq!(channel.status, ChannelStatus::Active);
        assert!(channel.has_participant(citizen));
        assert!(channel.has_participant(l2));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            DomainEvent::CaseAssigned { lawyer, channel_id: Some(_), .. } if *lawyer == l2
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            DomainEvent::ProposalRejected { proposal_id, .. } if *proposal_id == request.id
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_accepts_have_one_winner() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let case = matcher.create_case(CaseKind::Dispute, citizen, "Noise").await.unwrap();
        let o1 = matcher.submit_offer(case.id, UserId::new(), "one").await.unwrap();
        let o2 = matcher.submit_offer(case.id, UserId::new(), "two").await.unwrap();

        let m1 = matcher.clone();
        let m2 = matcher.clone();
        let case_id = case.id;
        let a = tokio::spawn(async move { m1.respond(case_id, o1.id, citizen, ProposalAction::Accept).await });
        let b = tokio::spawn(async move { m2.respond(case_id, o2.id, citizen, ProposalAction::Accept).await });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CaseError::AlreadyResolved))));

        let case = matcher.get_case(case_id).await.unwrap();
        assert!(case.invariants_hold());
        assert_eq!(
            case.proposals().filter(|p| p.status == ProposalStatus::Accepted).count(),
            1
        );
    }

    #[tokio::test]
    async fn unavailable_accept_leaves_case_untouched() {
        let store = StoreHandle::new(
            lexbridge_store::Database::open_in_memory().unwrap(),
            std::time::Duration::from_millis(30),
        );
        let (events, mut rx) = EventPublisher::channel();
        let matcher = Matcher::new(store.clone(), events);
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let case = matcher.create_case(CaseKind::Query, citizen, "Tenancy").await.unwrap();
        let offer = matcher.submit_offer(case.id, lawyer, "on it").await.unwrap();
        drain(&mut rx);

        let (holding, held) = tokio::sync::oneshot::channel();
        let busy = store.clone();
        let blocker = tokio::spawn(async move {
            busy.call(move |_| {
                let _ = holding.send(());
                std::thread::sleep(std::time::Duration::from_millis(120));
                Ok(())
            })
            .await
        });
        held.await.unwrap();

        assert!(matches!(
            matcher.respond(case.id, offer.id, citizen, ProposalAction::Accept).await,
            Err(CaseError::StoreUnavailable(_))
        ));
        blocker.await.unwrap().unwrap();

        let untouched = matcher.get_case(case.id).await.unwrap();
        assert_eq!(untouched.status, CaseStatus::Pending);
        assert!(untouched.proposal(offer.id).unwrap().is_pending());

        // Retrying succeeds and does the follow-up work.
        let outcome = matcher
            .respond(case.id, offer.id, citizen, ProposalAction::Accept)
            .await
            .unwrap();
        assert!(outcome.channel.is_some());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DomainEvent::CaseAssigned { channel_id: Some(_), .. })));
    }

    #[tokio::test]
    async fn offer_preconditions() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let case = matcher.create_case(CaseKind::Query, citizen, "Visa").await.unwrap();

        let offer = matcher.submit_offer(case.id, lawyer, "hello").await.unwrap();
        assert!(matches!(
            matcher.submit_offer(case.id, lawyer, "again").await,
            Err(CaseError::AlreadyOffered)
        ));
        assert!(matches!(
            matcher.submit_offer(CaseId::new(), lawyer, "x").await,
            Err(CaseError::NotFound)
        ));

        matcher
            .respond(case.id, offer.id, citizen, ProposalAction::Accept)
            .await
            .unwrap();
        assert!(matches!(
            matcher.submit_offer(case.id, UserId::new(), "late").await,
            Err(CaseError::NotAvailable)
        ));
    }

    #[tokio::test]
    async fn respond_preconditions() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let case = matcher.create_case(CaseKind::Query, citizen, "Lease").await.unwrap();
        let request = matcher.submit_request(case.id, citizen, lawyer, "help").await.unwrap();

        assert!(matches!(
            matcher.submit_request(case.id, UserId::new(), lawyer, "x").await,
            Err(CaseError::Forbidden(_))
        ));
        assert!(matches!(
            matcher.respond(case.id, Uuid::new_v4(), lawyer, ProposalAction::Accept).await,
            Err(CaseError::NotFound)
        ));
        // The citizen made the request, so only the lawyer may answer it.
        assert!(matches!(
            matcher.respond(case.id, request.id, citizen, ProposalAction::Accept).await,
            Err(CaseError::Forbidden(_))
        ));

        matcher
            .respond(case.id, request.id, lawyer, ProposalAction::Reject)
            .await
            .unwrap();
        assert!(matches!(
            matcher.respond(case.id, request.id, lawyer, ProposalAction::Accept).await,
            Err(CaseError::AlreadyResolved)
        ));
    }

    #[tokio::test]
    async fn reject_touches_only_that_proposal() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let case = matcher.create_case(CaseKind::Query, citizen, "Debt").await.unwrap();
        let o1 = matcher.submit_offer(case.id, UserId::new(), "one").await.unwrap();
        let o2 = matcher.submit_offer(case.id, UserId::new(), "two").await.unwrap();

        let outcome = matcher
            .respond(case.id, o1.id, citizen, ProposalAction::Reject)
            .await
            .unwrap();
        assert!(outcome.channel.is_none());

        let case = matcher.get_case(case.id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Pending);
        assert!(case.assigned_lawyer.is_none());
        assert_eq!(case.proposal(o1.id).unwrap().status, ProposalStatus::Rejected);
        assert_eq!(case.proposal(o2.id).unwrap().status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let case = matcher.create_case(CaseKind::Query, citizen, "Contract").await.unwrap();

        assert!(matches!(
            matcher.set_status(case.id, citizen, CaseStatus::InProgress).await,
            Err(CaseError::InvalidInput(_))
        ));

        let offer = matcher.submit_offer(case.id, lawyer, "ok").await.unwrap();
        matcher.respond(case.id, offer.id, citizen, ProposalAction::Accept).await.unwrap();

        let case = matcher.set_status(case.id, lawyer, CaseStatus::InProgress).await.unwrap();
        assert!(case.invariants_hold());
        let case = matcher.set_status(case.id, citizen, CaseStatus::Resolved).await.unwrap();
        assert_eq!(case.status, CaseStatus::Resolved);
        assert!(matches!(
            matcher.set_status(case.id, UserId::new(), CaseStatus::Closed).await,
            Err(CaseError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn case_channel_can_be_repaired() {
        let (matcher, _rx) = setup();
        let citizen = UserId::new();
        let lawyer = UserId::new();
        let case = matcher.create_case(CaseKind::Dispute, citizen, "Fence").await.unwrap();
        assert!(matches!(
            matcher.ensure_case_channel(case.id).await,
            Err(CaseError::NotAvailable)
        ));

        let offer = matcher.submit_offer(case.id, lawyer, "ok").await.unwrap();
        let outcome = matcher.respond(case.id, offer.id, citizen, ProposalAction::Accept).await.unwrap();
        let repaired = matcher.ensure_case_channel(case.id).await.unwrap();
        assert_eq!(Some(repaired.id), outcome.channel.map(|c| c.id));
    }

    #[tokio::test]
    async fn overlong_message_is_rejected() {
        let (matcher, _rx) = setup();
        let case = matcher.create_case(CaseKind::Query, UserId::new(), "Tax").await.unwrap();
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            matcher.submit_offer(case.id, UserId::new(), &long).await,
            Err(CaseError::InvalidInput(_))
        ));
        assert!(matches!(
            matcher.create_case(CaseKind::Query, UserId::new(), "  ").await,
            Err(CaseError::InvalidInput(_))
        ));
    }
}
