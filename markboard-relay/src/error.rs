//! Error taxonomy for the relay core.
//!
//! None of these are fatal to a connection: the offending event is dropped,
//! logged, and the connection (and its room) stays usable.

use thiserror::Error;

use crate::protocol::{ProtocolError, RoomId};
use crate::registry::ConnectionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Room key was empty or whitespace-only.
    #[error("room name must not be empty")]
    InvalidRoom,
    /// Event addressed to a room the sender is not currently in.
    #[error("connection {connection} is not a member of room {room}")]
    NotMember { connection: ConnectionId, room: RoomId },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Why a single fan-out target did not get a frame.
///
/// Isolated per target: never reported to the sender.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("transport closed")]
    Closed,
    #[error("outbound buffer full")]
    Lagged,
}
