//! Connection registry: which connections are attached and which rooms each
//! one belongs to.
//!
//! Rooms are not objects of their own. A room is an entry in a
//! `RoomId -> members` map that appears on the first join and is removed as
//! soon as its last member leaves or detaches.
//!
//! All state sits behind one lock, so every mutation and the recipient
//! snapshot it returns are taken atomically. A connection id is in a room's
//! member set if and only if the room is in that connection's room set.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use rendezvous_proto::event::ServerEvent;
use rendezvous_proto::id::{ConnectionId, RoomId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Items pushed to a connection's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send this event.
    Event(ServerEvent),
    /// Send a close frame and stop writing.
    Close,
}

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Outbound>;

/// Events a connection's outbox holds before further deliveries are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The connection is not (or no longer) attached.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// A room member together with the handle used to deliver to it.
#[derive(Debug, Clone)]
pub struct Recipient {
    id: ConnectionId,
    outbox: Outbox,
}

impl Recipient {
    /// The member's connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `event` for this member without waiting.
    ///
    /// Returns `false` and drops the event if the member's outbox is full or
    /// its writer has already gone away.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.outbox.try_send(Outbound::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn_id = %self.id, "outbox full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(conn_id = %self.id, "outbox closed, event dropped");
                false
            }
        }
    }
}

/// Members of one room as seen at a single point in time.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    /// The room the snapshot was taken of.
    pub room: RoomId,
    /// Members at the time of the snapshot.
    pub members: Vec<Recipient>,
}

impl RoomSnapshot {
    /// Ids of every member in the snapshot.
    #[must_use]
    pub fn member_ids(&self) -> HashSet<ConnectionId> {
        self.members.iter().map(Recipient::id).collect()
    }

    /// Members other than `sender`.
    pub fn others(&self, sender: ConnectionId) -> impl Iterator<Item = &Recipient> {
        self.members.iter().filter(move |m| m.id != sender)
    }
}

struct Connection {
    rooms: HashSet<RoomId>,
    outbox: Outbox,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    closing: bool,
}

impl Inner {
    fn snapshot(&self, room: &RoomId) -> RoomSnapshot {
        let members = self
            .rooms
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| {
                        self.connections.get(id).map(|conn| Recipient {
                            id: *id,
                            outbox: conn.outbox.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        RoomSnapshot {
            room: room.clone(),
            members,
        }
    }

    fn remove_member(&mut self, room: &RoomId, id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Authoritative record of attached connections and room membership.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new connection and returns its freshly allocated id.
    ///
    /// After [`close_all`](Self::close_all) the new connection is asked to
    /// close straight away.
    pub fn attach(&self, outbox: Outbox) -> ConnectionId {
        let mut inner = self.inner.write();
        let mut id = ConnectionId::new();
        while inner.connections.contains_key(&id) {
            id = ConnectionId::new();
        }
        if inner.closing {
            tracing::info!(conn_id = %id, "registry closing, closing new connection");
            let _ = outbox.try_send(Outbound::Close);
        }
        inner.connections.insert(
            id,
            Connection {
                rooms: HashSet::new(),
                outbox,
            },
        );
        id
    }

    /// Adds `id` to `room`, returning the room's members after the join.
    ///
    /// Joining a room twice is allowed and leaves membership unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not attached.
    pub fn join(&self, id: ConnectionId, room: &RoomId) -> Result<RoomSnapshot, RegistryError> {
        let mut inner = self.inner.write();
        let conn = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        conn.rooms.insert(room.clone());
        inner.rooms.entry(room.clone()).or_default().insert(id);
        Ok(inner.snapshot(room))
    }

    /// Removes `id` from `room`, returning the remaining members.
    ///
    /// Returns `Ok(None)` when `id` was not a member of `room`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not attached.
    pub fn leave(
        &self,
        id: ConnectionId,
        room: &RoomId,
    ) -> Result<Option<RoomSnapshot>, RegistryError> {
        let mut inner = self.inner.write();
        let conn = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        if !conn.rooms.remove(room) {
            return Ok(None);
        }
        inner.remove_member(room, id);
        Ok(Some(inner.snapshot(room)))
    }

    /// Removes `id` entirely, returning every room it belonged to along with
    /// that room's remaining members.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `id` is not attached,
    /// including when it was already detached.
    pub fn detach(&self, id: ConnectionId) -> Result<Vec<RoomSnapshot>, RegistryError> {
        let mut inner = self.inner.write();
        let conn = inner
            .connections
            .remove(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let mut rooms: Vec<RoomId> = conn.rooms.into_iter().collect();
        rooms.sort();
        let snapshots = rooms
            .iter()
            .map(|room| {
                inner.remove_member(room, id);
                inner.snapshot(room)
            })
            .collect();
        drop(inner);
        Ok(snapshots)
    }

    /// Ids of the current members of `room`. Empty for unknown rooms.
    #[must_use]
    pub fn members_of(&self, room: &RoomId) -> HashSet<ConnectionId> {
        self.inner.read().rooms.get(room).cloned().unwrap_or_default()
    }

    /// Snapshot of `room` taken on behalf of `requester`.
    ///
    /// The requester does not need to be a member of `room`, only attached.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `requester` is not
    /// attached.
    pub fn snapshot_for(
        &self,
        requester: ConnectionId,
        room: &RoomId,
    ) -> Result<RoomSnapshot, RegistryError> {
        let inner = self.inner.read();
        if !inner.connections.contains_key(&requester) {
            return Err(RegistryError::UnknownConnection(requester));
        }
        Ok(inner.snapshot(room))
    }

    /// Rooms `id` currently belongs to, or `None` if it is not attached.
    #[must_use]
    pub fn rooms_of(&self, id: ConnectionId) -> Option<HashSet<RoomId>> {
        self.inner
            .read()
            .connections
            .get(&id)
            .map(|conn| conn.rooms.clone())
    }

    /// Returns `true` if `id` is attached.
    #[must_use]
    pub fn is_attached(&self, id: ConnectionId) -> bool {
        self.inner.read().connections.contains_key(&id)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.inner.read().rooms.len()
    }

    /// Asks every attached connection's writer to close its socket, and
    /// every connection attached from now on as well.
    pub fn close_all(&self) {
        let mut inner = self.inner.write();
        inner.closing = true;
        for (id, conn) in &inner.connections {
            tracing::info!(conn_id = %id, "sending close frame to client");
            if let Err(TrySendError::Full(_)) = conn.outbox.try_send(Outbound::Close) {
                tracing::warn!(conn_id = %id, "outbox full, close frame not queued");
            }
        }
    }
}
