//! Presence registry: which sessions are in which room.
//!
//! DESIGN
//! ======
//! The registry keeps two maps under one lock: session -> room binding and
//! room -> members (with each member's outbound channel). A session is in at
//! most one room; joining another room leaves the previous one first. Empty
//! rooms are dropped from memory, while the durable room record survives.
//!
//! The async `join_room` / `leave_session` glue mutates the registry, queues
//! the presence mirror write and fans out the join/leave notice while still
//! holding the write lock. Presence writes therefore reach the store worker
//! in the same order the registry changed, and concurrent joins can't leave
//! a stale list behind.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here fails. Store writes go through the best-effort worker, and a
//! peer whose channel is full or closed simply misses that notice.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;
use whiteboard_frames::{PresenceNotice, RoomId, ServerEvent};

use crate::services::persistence::{self, StoreOp};
use crate::services::store::PresenceEntry;
use crate::state::AppState;

pub type SessionId = Uuid;

/// A live connection as seen by the relay.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub tx: mpsc::Sender<ServerEvent>,
}

/// A session's room binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub room_id: RoomId,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug)]
struct Member {
    user_id: String,
    username: String,
    tx: mpsc::Sender<ServerEvent>,
}

/// A session leaving a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub binding: SessionBinding,
    /// Members left in the room after the departure.
    pub user_count: usize,
    pub presence: Vec<PresenceEntry>,
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    /// The room the session was in before, if it was a different room.
    pub departed: Option<Departure>,
    pub user_count: usize,
    pub presence: Vec<PresenceEntry>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    sessions: HashMap<SessionId, RoomId>,
    rooms: HashMap<RoomId, BTreeMap<SessionId, Member>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to a room. Re-joining the same room refreshes the
    /// member's identity without a departure.
    pub fn join(&mut self, session: &SessionHandle, room_id: &str, user_id: &str, username: &str) -> Arrival {
        let switching = self.sessions.get(&session.id).is_some_and(|current| current != room_id);
        let departed = if switching { self.leave(session.id) } else { None };

        let members = self.rooms.entry(room_id.to_owned()).or_default();
        members.insert(
            session.id,
            Member { user_id: user_id.to_owned(), username: username.to_owned(), tx: session.tx.clone() },
        );
        let user_count = members.len();
        self.sessions.insert(session.id, room_id.to_owned());

        Arrival { departed, user_count, presence: self.presence(room_id) }
    }

    /// Remove a session from its room. Returns `None` if it was not in one.
    pub fn leave(&mut self, session_id: SessionId) -> Option<Departure> {
        let room_id = self.sessions.remove(&session_id)?;
        let members = self.rooms.get_mut(&room_id)?;
        let member = members.remove(&session_id)?;
        let user_count = members.len();
        if members.is_empty() {
            self.rooms.remove(&room_id);
        }

        let presence = self.presence(&room_id);
        Some(Departure {
            binding: SessionBinding { room_id, user_id: member.user_id, username: member.username },
            user_count,
            presence,
        })
    }

    #[must_use]
    pub fn binding(&self, session_id: SessionId) -> Option<SessionBinding> {
        let room_id = self.sessions.get(&session_id)?;
        let member = self.rooms.get(room_id)?.get(&session_id)?;
        Some(SessionBinding { room_id: room_id.clone(), user_id: member.user_id.clone(), username: member.username.clone() })
    }

    #[cfg(test)]
    #[must_use]
    pub fn user_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, BTreeMap::len)
    }

    /// Presence mirror entries for a room, ordered by session id.
    #[must_use]
    pub fn presence(&self, room_id: &str) -> Vec<PresenceEntry> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        members
            .iter()
            .map(|(session_id, member)| PresenceEntry {
                user_id: member.user_id.clone(),
                username: member.username.clone(),
                connection_id: session_id.to_string(),
            })
            .collect()
    }

    /// Rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Best-effort fan-out to a room. Returns how many members accepted it.
    pub fn broadcast(&self, room_id: &str, event: &ServerEvent, exclude: Option<SessionId>) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (session_id, member) in members {
            if exclude == Some(*session_id) {
                continue;
            }
            match member.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(%room_id, %session_id, event = event.name(), error = %e, "presence: dropped event for peer"),
            }
        }
        delivered
    }
}

// =============================================================================
// GLUE
// =============================================================================

/// Join a room: update the registry, mirror presence to the store and tell
/// the other members. Returns the new participant count.
pub async fn join_room(state: &AppState, session: &SessionHandle, room_id: &str, user_id: &str, username: &str) -> usize {
    let mut registry = state.presence.write().await;
    let arrival = registry.join(session, room_id, user_id, username);

    if let Some(departed) = &arrival.departed {
        announce_departure(state, &registry, session.id, departed);
    }

    persistence::enqueue(
        state,
        StoreOp::SetPresence { room_id: room_id.to_owned(), users: arrival.presence.clone() },
    );
    let notice = ServerEvent::UserJoined(PresenceNotice {
        user_id: user_id.to_owned(),
        username: username.to_owned(),
        user_count: arrival.user_count,
    });
    registry.broadcast(room_id, &notice, Some(session.id));

    info!(%room_id, session_id = %session.id, %user_id, user_count = arrival.user_count, "presence: joined room");
    arrival.user_count
}

/// Remove a session from its room, if any, and tell the remaining members.
pub async fn leave_session(state: &AppState, session_id: SessionId) -> Option<Departure> {
    let mut registry = state.presence.write().await;
    let departed = registry.leave(session_id)?;
    announce_departure(state, &registry, session_id, &departed);
    Some(departed)
}

fn announce_departure(state: &AppState, registry: &PresenceRegistry, session_id: SessionId, departed: &Departure) {
    let room_id = &departed.binding.room_id;
    persistence::enqueue(state, StoreOp::SetPresence { room_id: room_id.clone(), users: departed.presence.clone() });
    let notice = ServerEvent::UserLeft(PresenceNotice {
        user_id: departed.binding.user_id.clone(),
        username: departed.binding.username.clone(),
        user_count: departed.user_count,
    });
    registry.broadcast(room_id, &notice, Some(session_id));
    info!(%room_id, %session_id, user_id = %departed.binding.user_id, user_count = departed.user_count, "presence: left room");
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
