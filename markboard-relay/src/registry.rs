//! Connection registry: identity, current room and transport handle of
//! every live connection.
//!
//! The registry is plain data. It is only ever mutated together with the
//! [`RoomIndex`](crate::rooms::RoomIndex) under the membership lock held by
//! [`RelayState`](crate::state::RelayState), which keeps the two views
//! consistent.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::{DeliveryFailure, RelayError};
use crate::protocol::{Frame, RoomId};

/// Opaque connection identity, assigned at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Push side of a connection's outbound frame queue.
///
/// The receiving half is drained by the connection's transport task. Sends
/// never wait: a full queue or a closed transport is a [`DeliveryFailure`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle with room for `capacity` undelivered frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Lagged,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    handle: ConnectionHandle,
    room: Option<RoomId>,
    connected_at: Instant,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with no room.
    pub fn register(&mut self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId::new();
        self.entries.insert(
            id,
            ConnectionEntry {
                handle,
                room: None,
                connected_at: Instant::now(),
            },
        );
        id
    }

    /// Forget a connection, returning the room it was in.
    ///
    /// Unknown ids are a no-op so teardown may run more than once.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<RoomId> {
        self.entries.remove(&id).and_then(|entry| entry.room)
    }

    pub fn room(&self, id: ConnectionId) -> Option<&RoomId> {
        self.entries.get(&id).and_then(|entry| entry.room.as_ref())
    }

    /// Replace the connection's room, returning the previous one.
    pub fn set_room(
        &mut self,
        id: ConnectionId,
        room: Option<RoomId>,
    ) -> Result<Option<RoomId>, RelayError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(RelayError::UnknownConnection(id))?;
        Ok(std::mem::replace(&mut entry.room, room))
    }

    pub fn handle(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.entries.get(&id).map(|entry| &entry.handle)
    }

    pub fn connected_at(&self, id: ConnectionId) -> Option<Instant> {
        self.entries.get(&id).map(|entry| entry.connected_at)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every connection with the room it is currently in.
    pub fn rooms(&self) -> impl Iterator<Item = (ConnectionId, Option<&RoomId>)> + '_ {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.room.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[test]
    fn test_register_starts_without_room() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = registry.register(handle);

        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);
        assert!(registry.room(id).is_none());
        assert!(registry.connected_at(id).is_some());
    }

    #[test]
    fn test_set_room_returns_previous() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = registry.register(handle);

        assert_eq!(registry.set_room(id, Some(room("a"))).unwrap(), None);
        assert_eq!(registry.set_room(id, Some(room("b"))).unwrap(), Some(room("a")));
        assert_eq!(registry.room(id), Some(&room("b")));
        assert_eq!(registry.set_room(id, None).unwrap(), Some(room("b")));
        assert!(registry.room(id).is_none());
    }

    #[test]
    fn test_set_room_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        let stranger = ConnectionId::new();
        assert_eq!(
            registry.set_room(stranger, Some(room("a"))),
            Err(RelayError::UnknownConnection(stranger))
        );
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = registry.register(handle);
        registry.set_room(id, Some(room("a"))).unwrap();

        assert_eq!(registry.unregister(id), Some(room("a")));
        assert_eq!(registry.unregister(id), None);
        assert_eq!(registry.unregister(ConnectionId::new()), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handle_delivery_failures() {
        let (handle, mut rx) = ConnectionHandle::channel(1);

        assert!(handle.deliver(Frame::from("one".to_string())).is_ok());
        assert_eq!(
            handle.deliver(Frame::from("two".to_string())),
            Err(DeliveryFailure::Lagged)
        );
        assert_eq!(rx.recv().await.unwrap().as_str(), "one");

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.deliver(Frame::from("three".to_string())),
            Err(DeliveryFailure::Closed)
        );
    }
}
