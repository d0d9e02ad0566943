//! Session gateway: live sessions, rooms and the handlers behind every
//! inbound wire event.
//!
//! A session is registered once its credential verifies and immediately
//! joins its user's personal room. Channel rooms are joined explicitly and
//! only by participants. Every outbound event goes through the session's
//! bounded queue; the transport drains it.
//!
//! Handlers never tear a session down. Failures come back as
//! [`GatewayError`] and [`Gateway::handle_frame`] turns them into an `error`
//! event for the session that caused them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lexbridge_shared::constants::{MAX_MESSAGE_CHARS, PERSONAL_ROOM_PREFIX, SESSION_QUEUE_DEPTH};
use lexbridge_shared::identity::{Identity, IdentityVerifier};
use lexbridge_shared::protocol::{
    ChannelRef, ClientEvent, Connected, JoinedChannel, MarkRead, MessageAck, MessageNotice,
    PresenceUpdate, ReadReceipt, SendMessage, ServerEvent, SignalEnvelope, SignalKind,
    SignalRequest, TypingUpdate,
};
use lexbridge_shared::types::{ChannelId, MessageKind, PresenceStatus, UserId};
use lexbridge_store::{Message, NewMessage, StoreHandle};

use crate::error::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::rooms::{RoomRegistry, SessionId};

pub type Result<T> = std::result::Result<T, GatewayError>;

struct LiveSession {
    identity: Identity,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, LiveSession>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
    rooms: RoomRegistry,
}

impl Registry {
    fn queue(&self, session: SessionId, event: ServerEvent) -> bool {
        match self.sessions.get(&session) {
            Some(live) => live.tx.try_send(event).is_ok(),
            None => false,
        }
    }

    fn session_in_room(&self, user: UserId, room: &str) -> bool {
        self.by_user
            .get(&user)
            .map(|sessions| sessions.iter().any(|s| self.rooms.contains(room, s)))
            .unwrap_or(false)
    }

    /// Presence goes to every session of every other user.
    fn broadcast_presence(&self, user: UserId, status: PresenceStatus) {
        let event = ServerEvent::UserStatusUpdate(PresenceUpdate { user_id: user, status });
        for live in self.sessions.values() {
            if live.identity.user_id != user {
                let _ = live.tx.try_send(event.clone());
            }
        }
    }
}

/// Snapshot of the live registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct GatewayStats {
    pub sessions: usize,
    pub users: usize,
    pub rooms: usize,
}

#[derive(Clone)]
pub struct Gateway {
    verifier: Arc<dyn IdentityVerifier>,
    store: StoreHandle,
    limiter: RateLimiter<UserId>,
    registry: Arc<RwLock<Registry>>,
    /// One lock per channel, held from append to broadcast.
    append_locks: Arc<Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>>,
}

impl Gateway {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        store: StoreHandle,
        limiter: RateLimiter<UserId>,
    ) -> Self {
        Self {
            verifier,
            store,
            limiter,
            registry: Arc::new(RwLock::new(Registry::default())),
            append_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Verify a credential. Inactive identities are refused like bad ones.
    pub fn authenticate(&self, credential: &str) -> Result<Identity> {
        let identity = self.verifier.verify(credential).map_err(|e| {
            warn!(error = %e, "Rejected credential");
            GatewayError::from(e)
        })?;

        if !identity.active {
            warn!(user = %identity.user_id, "Rejected inactive identity");
            return Err(GatewayError::Unauthenticated("identity is inactive".into()));
        }
        Ok(identity)
    }

    /// Register a live session for an authenticated identity. `connected` is
    /// the first event on the returned queue.
    pub async fn register(&self, identity: Identity) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let session = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let _ = tx.try_send(ServerEvent::Connected(Connected {
            session_id: session,
            user_id: identity.user_id,
            role: identity.role,
        }));

        let personal = identity.user_id.personal_room();
        let mut registry = self.registry.write().await;
        registry.rooms.join(&personal, session, tx.clone());
        registry.sessions.insert(
            session,
            LiveSession {
                identity,
                tx,
                rooms: HashSet::from([personal]),
            },
        );

        let user_sessions = registry.by_user.entry(identity.user_id).or_default();
        user_sessions.insert(session);
        let first = user_sessions.len() == 1;
        if first {
            registry.broadcast_presence(identity.user_id, PresenceStatus::Online);
        }

        info!(
            session = %session,
            user = %identity.user_id,
            role = %identity.role,
            sessions = registry.sessions.len(),
            "Session connected"
        );

        (session, rx)
    }

    pub async fn connect(&self, credential: &str) -> Result<(SessionId, mpsc::Receiver<ServerEvent>)> {
        let identity = self.authenticate(credential)?;
        Ok(self.register(identity).await)
    }

    /// Remove the session from every room. Announces the user offline when
    /// this was their last session.
    pub async fn disconnect(&self, session: SessionId) {
        let mut registry = self.registry.write().await;
        let Some(live) = registry.sessions.remove(&session) else {
            return;
        };

        for room in &live.rooms {
            registry.rooms.leave(room, &session);
        }

        let user = live.identity.user_id;
        let last = match registry.by_user.get_mut(&user) {
            Some(sessions) => {
                sessions.remove(&session);
                sessions.is_empty()
            }
            None => true,
        };
        if last {
            registry.by_user.remove(&user);
            registry.broadcast_presence(user, PresenceStatus::Offline);
        }

        info!(session = %session, user = %user, "Session disconnected");
    }

    // -----------------------------------------------------------------------
    // Channel rooms
    // -----------------------------------------------------------------------

    pub async fn join_channel(&self, session: SessionId, channel_id: &ChannelId) -> Result<()> {
        let identity = self.identity_of(session).await?;
        let user = identity.user_id;

        let id = channel_id.clone();
        let (allowed, marked) = self
            .store
            .call(move |db| {
                if !db.is_participant(&id, user)? {
                    return Ok((false, Vec::new()));
                }
                Ok((true, db.mark_read(&id, user, None)?))
            })
            .await?;

        if !allowed {
            warn!(user = %user, channel = %channel_id, "Join refused, not a participant");
            return Err(GatewayError::AccessDenied);
        }

        let room = channel_id.as_str();
        let mut registry = self.registry.write().await;
        let Some(live) = registry.sessions.get_mut(&session) else {
            return Err(GatewayError::Unauthenticated("session closed".into()));
        };
        live.rooms.insert(room.to_string());
        let tx = live.tx.clone();
        registry.rooms.join(room, session, tx);

        if !marked.is_empty() {
            let receipt = ServerEvent::MessagesRead(ReadReceipt {
                channel_id: channel_id.clone(),
                read_by: user,
                message_ids: marked.clone(),
            });
            registry.rooms.broadcast(room, &receipt, Some(session));
        }

        registry.queue(
            session,
            ServerEvent::JoinedChannel(JoinedChannel {
                channel_id: channel_id.clone(),
                unread_cleared: marked.len(),
            }),
        );

        debug!(user = %user, channel = %channel_id, cleared = marked.len(), "Joined channel");
        Ok(())
    }

    pub async fn leave_channel(&self, session: SessionId, channel_id: &ChannelId) -> Result<()> {
        let room = channel_id.as_str();
        if room.starts_with(PERSONAL_ROOM_PREFIX) {
            return Err(GatewayError::Validation("personal rooms cannot be left".into()));
        }

        let mut registry = self.registry.write().await;
        let Some(live) = registry.sessions.get_mut(&session) else {
            return Err(GatewayError::Unauthenticated("session closed".into()));
        };
        live.rooms.remove(room);
        registry.rooms.leave(room, &session);
        registry.queue(
            session,
            ServerEvent::LeftChannel(ChannelRef {
                channel_id: channel_id.clone(),
            }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Persist a message and relay it to every session joined to the
    /// channel, the sender's included. The sending session alone gets the
    /// `message_sent` acknowledgement, after the relay.
    pub async fn send_message(&self, session: SessionId, request: SendMessage) -> Result<Message> {
        let identity = self.identity_of(session).await?;
        let user = identity.user_id;
        let (content, file_ref) = validate_message(&request)?;

        if !self.limiter.allow(user).await {
            warn!(user = %user, "Message rate limit exceeded");
            return Err(GatewayError::RateLimited);
        }

        let channel_id = request.channel_id.clone();
        let id = channel_id.clone();
        let channel = self.store.call(move |db| db.find_channel(&id)).await?;
        let channel = match channel {
            Some(channel) if channel.has_participant(user) => channel,
            _ => {
                warn!(user = %user, channel = %channel_id, "Send refused, not a participant");
                return Err(GatewayError::AccessDenied);
            }
        };

        let lock = self.append_lock(&channel_id).await;
        let _ordered = lock.lock().await;

        let new = NewMessage {
            channel_id: channel_id.clone(),
            sender: user,
            kind: request.kind,
            content,
            file_ref,
        };
        let message = self.store.call(move |db| db.append_message(&new)).await?;

        let registry = self.registry.read().await;
        let room = channel_id.as_str();
        let delivered = registry
            .rooms
            .broadcast(room, &ServerEvent::NewMessage(message.to_payload()), None);

        let notice = ServerEvent::MessageNotification(MessageNotice {
            channel_id: channel_id.clone(),
            message_id: message.id,
            sender: user,
        });
        for participant in channel.participants.iter().copied() {
            if participant != user && !registry.session_in_room(participant, room) {
                registry
                    .rooms
                    .broadcast(&participant.personal_room(), &notice, None);
            }
        }

        registry.queue(
            session,
            ServerEvent::MessageSent(MessageAck {
                channel_id: channel_id.clone(),
                message_id: message.id,
                seq: message.seq,
                sent_at: message.sent_at,
                client_ref: request.client_ref,
            }),
        );

        debug!(
            user = %user,
            channel = %channel_id,
            seq = message.seq,
            delivered,
            "Message relayed"
        );
        Ok(message)
    }

    /// Mark messages read and tell the other joined sessions. Returns the
    /// ids that were newly marked.
    pub async fn mark_read(&self, session: SessionId, request: MarkRead) -> Result<Vec<Uuid>> {
        let identity = self.identity_of(session).await?;
        let user = identity.user_id;

        let id = request.channel_id.clone();
        let ids = request.message_ids;
        let marked = self
            .store
            .call(move |db| {
                if !db.is_participant(&id, user)? {
                    return Ok(None);
                }
                db.mark_read(&id, user, ids.as_deref()).map(Some)
            })
            .await?
            .ok_or(GatewayError::AccessDenied)?;

        if !marked.is_empty() {
            let receipt = ServerEvent::MessagesRead(ReadReceipt {
                channel_id: request.channel_id.clone(),
                read_by: user,
                message_ids: marked.clone(),
            });
            let registry = self.registry.read().await;
            registry
                .rooms
                .broadcast(request.channel_id.as_str(), &receipt, Some(session));
        }
        Ok(marked)
    }

    pub async fn typing(&self, session: SessionId, channel_id: &ChannelId, is_typing: bool) -> Result<()> {
        let registry = self.registry.read().await;
        let identity = registry
            .sessions
            .get(&session)
            .map(|live| live.identity)
            .ok_or_else(|| GatewayError::Unauthenticated("session closed".into()))?;

        let room = channel_id.as_str();
        if !registry.rooms.contains(room, &session) {
            return Err(GatewayError::AccessDenied);
        }

        let event = ServerEvent::UserTyping(TypingUpdate {
            channel_id: channel_id.clone(),
            user_id: identity.user_id,
            is_typing,
        });
        registry.rooms.broadcast(room, &event, Some(session));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    /// Relay a call-signaling event. Nothing is persisted and an offline
    /// target simply receives nothing. A signal to a user needs a channel
    /// shared with them; a signal to a channel needs the sender in its room.
    /// Returns how many sessions got it.
    pub async fn relay_signal(
        &self,
        session: SessionId,
        kind: SignalKind,
        request: &SignalRequest,
    ) -> Result<usize> {
        let from = self.identity_of(session).await?.user_id;

        // Calls go only to people the sender already has a channel with.
        if let Some(target) = request.to_user {
            let related = self
                .store
                .call(move |db| db.shares_channel(from, target))
                .await?;
            if !related {
                warn!(from = %from, to = %target, kind = ?kind, "Signal refused, no shared channel");
                return Err(GatewayError::AccessDenied);
            }
        }

        let registry = self.registry.read().await;
        let event = kind.into_event(SignalEnvelope {
            from,
            channel_id: request.channel_id.clone(),
            payload: request.payload.clone(),
        });

        let delivered = match (&request.to_user, &request.channel_id) {
            (Some(target), _) => registry
                .rooms
                .broadcast(&target.personal_room(), &event, None),
            (None, Some(channel_id)) => {
                let room = channel_id.as_str();
                if !registry.rooms.contains(room, &session) {
                    return Err(GatewayError::AccessDenied);
                }
                registry.rooms.broadcast(room, &event, Some(session))
            }
            (None, None) => {
                return Err(GatewayError::Validation(
                    "signal needs a target user or channel".into(),
                ))
            }
        };

        if delivered == 0 {
            debug!(from = %from, kind = ?kind, "Signal dropped, no live target");
        }
        Ok(delivered)
    }

    pub async fn ping(&self, session: SessionId) {
        self.registry.read().await.queue(session, ServerEvent::Pong);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handle one inbound text frame. Malformed frames and failed handlers
    /// produce an `error` event; the session stays open either way.
    pub async fn handle_frame(&self, session: SessionId, text: &str) {
        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(session = %session, error = %e, "Unparseable frame");
                self.push(session, ServerEvent::error("invalid_event", e.to_string()))
                    .await;
                return;
            }
        };

        if let Err(e) = self.handle_event(session, event).await {
            if e.is_transient() {
                warn!(session = %session, error = %e, "Handler failed");
            } else {
                debug!(session = %session, error = %e, "Handler refused event");
            }
            self.push(session, ServerEvent::error(e.code(), e.client_message()))
                .await;
        }
    }

    pub async fn handle_event(&self, session: SessionId, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::JoinChannel(r) => self.join_channel(session, &r.channel_id).await,
            ClientEvent::LeaveChannel(r) => self.leave_channel(session, &r.channel_id).await,
            ClientEvent::SendMessage(m) => self.send_message(session, m).await.map(|_| ()),
            ClientEvent::MarkRead(m) => self.mark_read(session, m).await.map(|_| ()),
            ClientEvent::TypingStart(r) => self.typing(session, &r.channel_id, true).await,
            ClientEvent::TypingStop(r) => self.typing(session, &r.channel_id, false).await,
            ClientEvent::Ping => {
                self.ping(session).await;
                Ok(())
            }
            other => match other.as_signal() {
                Some((kind, request)) => self.relay_signal(session, kind, request).await.map(|_| ()),
                None => Ok(()),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Notifications and housekeeping
    // -----------------------------------------------------------------------

    /// Push an event to every session of `user`. Returns how many got it.
    pub async fn notify_user(&self, user: UserId, event: &ServerEvent) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .broadcast(&user.personal_room(), event, None)
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.registry.read().await.by_user.contains_key(&user)
    }

    pub async fn stats(&self) -> GatewayStats {
        let registry = self.registry.read().await;
        GatewayStats {
            sessions: registry.sessions.len(),
            users: registry.by_user.len(),
            rooms: registry.rooms.room_count(),
        }
    }

    /// Drop stale limiter windows and append locks nobody holds.
    pub async fn purge(&self) {
        self.limiter.purge_stale().await;
        let mut locks = self.append_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Queue an event for one session. `false` if it is gone or its queue
    /// is full.
    pub async fn push(&self, session: SessionId, event: ServerEvent) -> bool {
        self.registry.read().await.queue(session, event)
    }

    async fn identity_of(&self, session: SessionId) -> Result<Identity> {
        self.registry
            .read()
            .await
            .sessions
            .get(&session)
            .map(|live| live.identity)
            .ok_or_else(|| GatewayError::Unauthenticated("session closed".into()))
    }

    async fn append_lock(&self, channel_id: &ChannelId) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        Arc::clone(locks.entry(channel_id.clone()).or_default())
    }
}

/// Content rules: text needs non-blank content of at most
/// [`MAX_MESSAGE_CHARS`]; a file needs a reference; system messages are
/// never accepted from clients.
fn validate_message(request: &SendMessage) -> Result<(Option<String>, Option<String>)> {
    let content = request.content.as_deref().filter(|c| !c.trim().is_empty());
    if let Some(c) = content {
        if c.chars().count() > MAX_MESSAGE_CHARS {
            return Err(GatewayError::Validation(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
    }

    match request.kind {
        MessageKind::System => Err(GatewayError::Validation(
            "system messages cannot be sent".into(),
        )),
        MessageKind::Text => match content {
            Some(c) => Ok((Some(c.to_string()), None)),
            None => Err(GatewayError::Validation("message content is empty".into())),
        },
        MessageKind::File => match request.file_ref.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(file_ref) => Ok((content.map(str::to_string), Some(file_ref.to_string()))),
            None => Err(GatewayError::Validation("file message needs a file reference".into())),
        },
    }
}
