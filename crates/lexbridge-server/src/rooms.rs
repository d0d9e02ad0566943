use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use lexbridge_shared::protocol::ServerEvent;

/// One live connection. A user may hold several.
pub type SessionId = Uuid;

/// A named fan-out group of sessions: a channel room or a personal room.
pub struct Room {
    pub name: String,
    members: HashMap<SessionId, mpsc::Sender<ServerEvent>>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    pub fn join(&mut self, session: SessionId, tx: mpsc::Sender<ServerEvent>) -> bool {
        self.members.insert(session, tx).is_none()
    }

    pub fn leave(&mut self, session: &SessionId) -> bool {
        self.members.remove(session).is_some()
    }

    /// Queue `event` for every member except `except`. Returns how many
    /// sessions it was queued for; full queues drop the event.
    pub fn broadcast(&self, event: &ServerEvent, except: Option<SessionId>) -> usize {
        let mut delivered = 0;
        for (session, tx) in &self.members {
            if Some(*session) == except {
                continue;
            }

            if tx.try_send(event.clone()).is_err() {
                debug!(
                    room = %self.name,
                    session = %session,
                    "Dropping event for slow session"
                );
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.members.contains_key(session)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// All rooms with at least one member. Not synchronized itself; the gateway
/// keeps it behind its registry lock.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, creating it if missing.
    pub fn join(&mut self, name: &str, session: SessionId, tx: mpsc::Sender<ServerEvent>) -> bool {
        let room = self
            .rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name));
        let joined = room.join(session, tx);
        if joined {
            debug!(room = %name, session = %session, members = room.len(), "Session joined room");
        }
        joined
    }

    /// Leave a room. Removes the room once it is empty.
    pub fn leave(&mut self, name: &str, session: &SessionId) -> bool {
        let (left, now_empty) = match self.rooms.get_mut(name) {
            Some(room) => (room.leave(session), room.is_empty()),
            None => (false, false),
        };

        if now_empty {
            self.rooms.remove(name);
            info!(room = %name, "Removed empty room");
        }
        left
    }

    pub fn broadcast(&self, name: &str, event: &ServerEvent, except: Option<SessionId>) -> usize {
        self.rooms
            .get(name)
            .map(|room| room.broadcast(event, except))
            .unwrap_or(0)
    }

    pub fn contains(&self, name: &str, session: &SessionId) -> bool {
        self.rooms
            .get(name)
            .map(|room| room.contains(session))
            .unwrap_or(false)
    }

    pub fn member_count(&self, name: &str) -> usize {
        self.rooms.get(name).map(Room::len).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
