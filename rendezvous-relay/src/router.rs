//! Room router: turns one inbound event into deliveries to the other members
//! of the room it names.
//!
//! The sender of an event is never among its recipients. Every handler returns
//! the number of deliveries it queued; a connection that is not attached
//! (typically one racing its own disconnect) gets zero and no error.

use std::sync::Arc;

use rendezvous_proto::event::{ClientEvent, Payload, ServerEvent, SignalKind};
use rendezvous_proto::id::{ConnectionId, RoomId};

use crate::registry::{ConnectionRegistry, Outbox, RegistryError, RoomSnapshot};

/// Routes inbound client events through a shared [`ConnectionRegistry`].
pub struct RoomRouter {
    registry: Arc<ConnectionRegistry>,
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new(Arc::new(ConnectionRegistry::new()))
    }
}

impl RoomRouter {
    /// Creates a router over the given registry.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this router resolves membership through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Attaches a new connection whose deliveries go to `outbox`.
    pub fn attach(&self, outbox: Outbox) -> ConnectionId {
        let id = self.registry.attach(outbox);
        tracing::info!(conn_id = %id, "client connected");
        id
    }

    /// Routes a decoded event from `from` to the matching handler.
    pub fn dispatch(&self, from: ConnectionId, event: ClientEvent) -> usize {
        match event {
            ClientEvent::Join(room) => self.handle_join(from, &room),
            ClientEvent::Leave(room) => self.handle_leave(from, &room),
            ClientEvent::Offer(signal) => {
                self.handle_signal(SignalKind::Offer, &signal.room_id, from, signal.sdp)
            }
            ClientEvent::Answer(signal) => {
                self.handle_signal(SignalKind::Answer, &signal.room_id, from, signal.sdp)
            }
            ClientEvent::Candidate(signal) => self.handle_signal(
                SignalKind::Candidate,
                &signal.room_id,
                from,
                signal.candidate,
            ),
        }
    }

    /// Joins `id` to `room` and tells the other members with `peer-joined`.
    ///
    /// Joining a room already joined notifies the other members again.
    pub fn handle_join(&self, id: ConnectionId, room: &RoomId) -> usize {
        let snapshot = match self.registry.join(id, room) {
            Ok(snapshot) => snapshot,
            Err(e) => return swallow(&e, "join"),
        };
        tracing::info!(conn_id = %id, room_id = %room, "client joined room");
        broadcast(&snapshot, id, &ServerEvent::PeerJoined(id))
    }

    /// Removes `id` from `room` and tells the remaining members with
    /// `peer-left`. Nothing is sent if `id` was not a member.
    pub fn handle_leave(&self, id: ConnectionId, room: &RoomId) -> usize {
        match self.registry.leave(id, room) {
            Ok(Some(snapshot)) => {
                tracing::info!(conn_id = %id, room_id = %room, "client left room");
                broadcast(&snapshot, id, &ServerEvent::PeerLeft(id))
            }
            Ok(None) => {
                tracing::debug!(conn_id = %id, room_id = %room, "leave for room not joined");
                0
            }
            Err(e) => swallow(&e, "leave"),
        }
    }

    /// Forwards a negotiation payload to every member of `room` except `from`.
    ///
    /// `from` does not have to be a member of `room`.
    pub fn handle_signal(
        &self,
        kind: SignalKind,
        room: &RoomId,
        from: ConnectionId,
        payload: Payload,
    ) -> usize {
        let snapshot = match self.registry.snapshot_for(from, room) {
            Ok(snapshot) => snapshot,
            Err(e) => return swallow(&e, kind.name()),
        };
        let event = kind.into_event(payload, from);
        let delivered = broadcast(&snapshot, from, &event);
        tracing::debug!(
            conn_id = %from,
            room_id = %room,
            kind = %kind,
            recipients = delivered,
            "relayed signal"
        );
        delivered
    }

    /// Detaches `id` and sends `peer-left` to the remaining members of every
    /// room it belonged to.
    pub fn handle_disconnect(&self, id: ConnectionId) -> usize {
        let snapshots = match self.registry.detach(id) {
            Ok(snapshots) => snapshots,
            Err(e) => return swallow(&e, "disconnect"),
        };
        tracing::info!(conn_id = %id, rooms = snapshots.len(), "client disconnected");
        let event = ServerEvent::PeerLeft(id);
        snapshots
            .iter()
            .map(|snapshot| broadcast(snapshot, id, &event))
            .sum()
    }
}

/// Delivers `event` to every member of `snapshot` other than `sender`.
fn broadcast(snapshot: &RoomSnapshot, sender: ConnectionId, event: &ServerEvent) -> usize {
    snapshot
        .others(sender)
        .filter(|recipient| recipient.deliver(event.clone()))
        .count()
}

fn swallow(error: &RegistryError, event: &str) -> usize {
    tracing::debug!(error = %error, event, "event from detached connection ignored");
    0
}
