//! Room index: room key → member connections.
//!
//! Rooms are ephemeral. A room exists exactly while it has members: the
//! first join creates the entry and the last leave deletes it.

use std::collections::{HashMap, HashSet};

use crate::protocol::RoomId;
use crate::registry::ConnectionId;

/// Outcome of [`RoomIndex::switch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSwitch {
    /// Already a member of the target room
    Unchanged,
    /// Entered the target room from no room
    Joined,
    /// Left `from` and entered the target room
    Moved { from: RoomId },
}

#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `room`, creating the room if needed.
    ///
    /// Returns `false` if it was already a member.
    pub fn join(&mut self, room: RoomId, id: ConnectionId) -> bool {
        self.rooms.entry(room).or_default().insert(id)
    }

    /// Remove `id` from `room`, deleting the room once it is empty.
    ///
    /// Returns `false` if it was not a member.
    pub fn leave(&mut self, room: &RoomId, id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(room);
            log::debug!("Room {room} removed (empty)");
        }
        removed
    }

    /// Move `id` out of `from` (if any) and into `to` as one step.
    ///
    /// Takes `&mut self`, so no reader can observe the connection in both
    /// rooms or in neither.
    pub fn switch(&mut self, from: Option<&RoomId>, to: RoomId, id: ConnectionId) -> RoomSwitch {
        match from {
            Some(prev) if *prev == to => {
                self.join(to, id);
                RoomSwitch::Unchanged
            }
            Some(prev) => {
                self.leave(prev, id);
                self.join(to, id);
                RoomSwitch::Moved { from: prev.clone() }
            }
            None => {
                self.join(to, id);
                RoomSwitch::Joined
            }
        }
    }

    pub fn members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fan-out view: every member of `room` except `exclude`.
    pub fn members_except(
        &self,
        room: &RoomId,
        exclude: ConnectionId,
    ) -> impl Iterator<Item = ConnectionId> + '_ {
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |id| *id != exclude)
    }

    pub fn contains(&self, room: &RoomId, id: ConnectionId) -> bool {
        self.rooms.get(room).is_some_and(|members| members.contains(&id))
    }

    /// A room with no members does not exist, so this is also "not present".
    pub fn is_empty(&self, room: &RoomId) -> bool {
        self.rooms.get(room).map_or(true, |members| members.is_empty())
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> + '_ {
        self.rooms.keys()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&RoomId, &HashSet<ConnectionId>)> + '_ {
        self.rooms.iter()
    }
}
