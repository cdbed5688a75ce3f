//! Per-connection lifecycle and inbound event dispatch.
//!
//! ```text
//! Connected ──joinRoom(r)──► InRoom(r) ──joinRoom(r')──► InRoom(r')
//!     │                        │   ▲                        │
//!     │                        └───┴──leaveRoom(r)──► Connected
//!     └────────────── transport close (any phase) ──► Disconnected
//! ```
//!
//! Room transitions only happen here, and each one is a single write to
//! the shared membership.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::{BoardEvent, ClientEvent, Frame, ProtocolError, RoomId};
use crate::registry::{ConnectionHandle, ConnectionId};
use crate::relay::EventRelay;
use crate::rooms::RoomSwitch;
use crate::state::{RelayCounters, RelayState};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connected,
    InRoom(RoomId),
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct LifecycleController {
    state: Arc<RelayState>,
    relay: EventRelay,
    outbound_capacity: usize,
}

impl LifecycleController {
    pub fn new(state: Arc<RelayState>, outbound_capacity: usize) -> Self {
        let relay = EventRelay::new(state.clone());
        Self {
            state,
            relay,
            outbound_capacity,
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    /// Register a new connection. The receiver yields the frames to write
    /// to its transport.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (handle, outbound) = ConnectionHandle::channel(self.outbound_capacity);
        let id = self.state.write().await.register(handle);
        RelayCounters::bump(&self.state.counters().total_connections, 1);
        log::info!("Connection {id} established");
        (id, outbound)
    }

    pub async fn phase(&self, id: ConnectionId) -> ConnectionPhase {
        let membership = self.state.read().await;
        if !membership.registry().contains(id) {
            return ConnectionPhase::Disconnected;
        }
        match membership.registry().room(id) {
            Some(room) => ConnectionPhase::InRoom(room.clone()),
            None => ConnectionPhase::Connected,
        }
    }

    /// Route one inbound event to its handler.
    pub async fn dispatch(&self, id: ConnectionId, event: ClientEvent) -> Result<(), RelayError> {
        match event {
            ClientEvent::JoinRoom { room } => self.join_room(id, &room).await.map(|_| ()),
            ClientEvent::LeaveRoom { room } => self.leave_room(id, &room).await.map(|_| ()),
            ClientEvent::Paint { room, paint } => {
                self.relay_to(id, &room, BoardEvent::Paint(paint)).await
            }
            ClientEvent::Markboard { room, markboard } => {
                self.relay_to(id, &room, BoardEvent::Markboard(markboard)).await
            }
            ClientEvent::MarkboardReq { room } => {
                self.relay_to(id, &room, BoardEvent::MarkboardReq).await
            }
        }
    }

    /// Decode and dispatch one text frame.
    ///
    /// Never fails: a bad frame is logged and dropped and the connection
    /// carries on.
    pub async fn handle_frame(&self, id: ConnectionId, text: &str) {
        let event = match ClientEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping malformed frame from {id}: {e}");
                self.note_dropped();
                return;
            }
        };

        let name = event.name();
        if let Err(e) = self.dispatch(id, event).await {
            self.note_dropped();
            match &e {
                RelayError::NotMember { .. } => log::info!("Dropping {name} from {id}: {e}"),
                RelayError::InvalidRoom => log::warn!("Dropping {name} from {id}: {e}"),
                _ => log::warn!("Failed to handle {name} from {id}: {e}"),
            }
        }
    }

    /// Drop a frame the transport could not hand over as text.
    pub fn reject_frame(&self, id: ConnectionId, reason: &ProtocolError) {
        log::warn!("Dropping frame from {id}: {reason}");
        self.note_dropped();
    }

    /// Switch `id` into `room`, leaving its current room in the same step.
    pub async fn join_room(&self, id: ConnectionId, room: &str) -> Result<RoomSwitch, RelayError> {
        let room = RoomId::parse(room)?;
        let switch = self.state.write().await.switch_room(id, room.clone())?;
        match &switch {
            RoomSwitch::Joined => log::info!("Connection {id} joined room {room}"),
            RoomSwitch::Moved { from } => {
                log::info!("Connection {id} moved from room {from} to {room}")
            }
            RoomSwitch::Unchanged => log::debug!("Connection {id} already in room {room}"),
        }
        Ok(switch)
    }

    /// Leave `room` if `id` is in it; otherwise nothing changes.
    pub async fn leave_room(&self, id: ConnectionId, room: &str) -> Result<bool, RelayError> {
        let room = RoomId::parse(room)?;
        let left = self.state.write().await.leave_room(id, &room)?;
        if left {
            log::info!("Connection {id} left room {room}");
        } else {
            log::debug!("Connection {id} asked to leave room {room} it is not in");
        }
        Ok(left)
    }

    /// Tear down `id`. Safe to call any number of times.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<RoomId> {
        let room = self.state.write().await.remove(id);
        match &room {
            Some(room) => log::info!("Connection {id} disconnected from room {room}"),
            None => log::info!("Connection {id} disconnected"),
        }
        room
    }

    async fn relay_to(&self, id: ConnectionId, room: &str, event: BoardEvent) -> Result<(), RelayError> {
        let room = RoomId::parse(room)?;
        self.relay.relay(id, &room, event).await.map(|_| ())
    }

    fn note_dropped(&self) {
        RelayCounters::bump(&self.state.counters().events_dropped, 1);
    }
}
