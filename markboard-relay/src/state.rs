//! Shared relay state: the membership map and relay counters.
//!
//! Registry and room index live behind one `RwLock` so that every mutation
//! updates both views together. Joins, leaves, switches and disconnects take
//! the write lock; fan-out takes the read lock and delivers while holding it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::RelayError;
use crate::protocol::RoomId;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::rooms::{RoomIndex, RoomSwitch};

/// Connection registry and room index, mutated as a unit.
#[derive(Debug, Default)]
pub struct Membership {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    pub fn register(&mut self, handle: ConnectionHandle) -> ConnectionId {
        self.registry.register(handle)
    }

    /// Put `id` in `room`, leaving its previous room in the same step.
    pub fn switch_room(&mut self, id: ConnectionId, room: RoomId) -> Result<RoomSwitch, RelayError> {
        let previous = self.registry.set_room(id, Some(room.clone()))?;
        Ok(self.rooms.switch(previous.as_ref(), room, id))
    }

    /// Leave `room` if `id` is currently in it. Returns whether it left.
    pub fn leave_room(&mut self, id: ConnectionId, room: &RoomId) -> Result<bool, RelayError> {
        if !self.registry.contains(id) {
            return Err(RelayError::UnknownConnection(id));
        }
        if self.registry.room(id) != Some(room) {
            return Ok(false);
        }
        self.registry.set_room(id, None)?;
        self.rooms.leave(room, id);
        Ok(true)
    }

    /// Drop `id` from both views. Unknown ids are a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<RoomId> {
        let room = self.registry.unregister(id);
        if let Some(room) = &room {
            self.rooms.leave(room, id);
        }
        room
    }

    /// Registry and room index agree in both directions, and no room is empty.
    pub fn is_consistent(&self) -> bool {
        let registry_to_rooms = self.registry.rooms().all(|(id, room)| match room {
            Some(room) => self.rooms.contains(room, id),
            None => true,
        });
        let rooms_to_registry = self.rooms.iter().all(|(room, members)| {
            !members.is_empty()
                && members
                    .iter()
                    .all(|id| self.registry.room(*id) == Some(room))
        });
        registry_to_rooms && rooms_to_registry
    }
}

/// Point-in-time relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
    pub events_relayed: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub events_dropped: u64,
}

/// Hot-path counters, updated without taking the membership lock.
#[derive(Debug, Default)]
pub(crate) struct RelayCounters {
    pub total_connections: AtomicU64,
    pub events_relayed: AtomicU64,
    pub deliveries: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl RelayCounters {
    pub fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Owned relay state, shared by `Arc` between the relay and the lifecycle
/// controller. One per server, so tests get isolated instances.
#[derive(Debug, Default)]
pub struct RelayState {
    membership: RwLock<Membership>,
    counters: RelayCounters,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Membership> {
        self.membership.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Membership> {
        self.membership.write().await
    }

    pub(crate) fn counters(&self) -> &RelayCounters {
        &self.counters
    }

    pub async fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.read().await.registry().room(id).cloned()
    }

    pub async fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.read().await.rooms().members(room)
    }

    pub async fn room_exists(&self, room: &RoomId) -> bool {
        !self.read().await.rooms().is_empty(room)
    }

    pub async fn room_count(&self) -> usize {
        self.read().await.rooms().room_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.read().await.registry().len()
    }

    pub async fn is_consistent(&self) -> bool {
        self.read().await.is_consistent()
    }

    pub async fn stats(&self) -> RelayStats {
        let membership = self.read().await;
        let c = &self.counters;
        RelayStats {
            total_connections: c.total_connections.load(Ordering::Relaxed),
            active_connections: membership.registry().len(),
            active_rooms: membership.rooms().room_count(),
            events_relayed: c.events_relayed.load(Ordering::Relaxed),
            deliveries: c.deliveries.load(Ordering::Relaxed),
            delivery_failures: c.delivery_failures.load(Ordering::Relaxed),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    fn connect(membership: &mut Membership) -> ConnectionId {
        let (handle, _rx) = ConnectionHandle::channel(4);
        membership.register(handle)
    }

    #[test]
    fn test_switch_room_updates_both_views() {
        let mut m = Membership::new();
        let a = connect(&mut m);

        assert_eq!(m.switch_room(a, room("r1")).unwrap(), RoomSwitch::Joined);
        assert_eq!(m.registry().room(a), Some(&room("r1")));
        assert!(m.rooms().contains(&room("r1"), a));

        assert_eq!(
            m.switch_room(a, room("r2")).unwrap(),
            RoomSwitch::Moved { from: room("r1") }
        );
        assert_eq!(m.registry().room(a), Some(&room("r2")));
        assert!(m.rooms().is_empty(&room("r1")));
        assert!(m.is_consistent());
    }

    #[test]
    fn test_switch_room_unknown_connection() {
        let mut m = Membership::new();
        let ghost = ConnectionId::new();
        assert_eq!(
            m.switch_room(ghost, room("r1")),
            Err(RelayError::UnknownConnection(ghost))
        );
        assert_eq!(m.rooms().room_count(), 0);
    }

    #[test]
    fn test_leave_room_only_if_current() {
        let mut m = Membership::new();
        let a = connect(&mut m);
        m.switch_room(a, room("r1")).unwrap();

        assert!(!m.leave_room(a, &room("r2")).unwrap());
        assert!(m.rooms().contains(&room("r1"), a));

        assert!(m.leave_room(a, &room("r1")).unwrap());
        assert!(m.registry().room(a).is_none());
        assert_eq!(m.rooms().room_count(), 0);
        assert!(!m.leave_room(a, &room("r1")).unwrap());
        assert!(m.is_consistent());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut m = Membership::new();
        let a = connect(&mut m);
        let b = connect(&mut m);
        m.switch_room(a, room("r1")).unwrap();
        m.switch_room(b, room("r1")).unwrap();

        assert_eq!(m.remove(a), Some(room("r1")));
        assert_eq!(m.remove(a), None);
        assert_eq!(m.rooms().members(&room("r1")), vec![b]);

        assert_eq!(m.remove(b), Some(room("r1")));
        assert_eq!(m.rooms().room_count(), 0);
        assert!(m.registry().is_empty());
        assert!(m.is_consistent());
    }

    #[tokio::test]
    async fn test_relay_state_initial_stats() {
        let state = RelayState::new();
        assert_eq!(state.stats().await, RelayStats::default());
        assert!(state.is_consistent().await);
    }
}
