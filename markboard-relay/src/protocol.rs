//! JSON wire protocol for the markboard relay.
//!
//! Every WebSocket frame is a JSON object tagged by `event`:
//! ```text
//! {"event":"joinRoom","room":"r1"}
//! {"event":"leaveRoom","room":"r1"}
//! {"event":"paint","room":"r1","paint":<any>}
//! {"event":"markboard","room":"r1","markboard":<any>}
//! {"event":"markboardReq","room":"r1"}
//! ```
//!
//! `paint` and `markboard` payloads are opaque to the relay and forwarded
//! verbatim. Outbound frames use the same shapes with the trimmed room key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::error::RelayError;

/// An encoded outbound text frame.
///
/// Cheap to clone, so one encoding is shared by every fan-out target.
pub type Frame = Utf8Bytes;

/// Validated room key: trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Trim `raw` and reject it if nothing is left.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RelayError::InvalidRoom);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

/// The three relayable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Incremental drawing operation
    Paint,
    /// Full-board snapshot
    Markboard,
    /// Request for peers to share their full board
    MarkboardReq,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Paint => "paint",
            Self::Markboard => "markboard",
            Self::MarkboardReq => "markboardReq",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A room-scoped event as the relay sees it: kind plus opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Paint(Value),
    Markboard(Value),
    MarkboardReq,
}

impl BoardEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Paint(_) => EventKind::Paint,
            Self::Markboard(_) => EventKind::Markboard,
            Self::MarkboardReq => EventKind::MarkboardReq,
        }
    }

    /// Address this event to `room` for delivery.
    pub fn into_server_event(self, room: RoomId) -> ServerEvent {
        match self {
            Self::Paint(paint) => ServerEvent::Paint { room, paint },
            Self::Markboard(markboard) => ServerEvent::Markboard { room, markboard },
            Self::MarkboardReq => ServerEvent::MarkboardReq { room },
        }
    }
}

/// Inbound frame from a client.
///
/// Room keys stay raw strings here; validation belongs to the handlers so
/// that an empty room is reported as `InvalidRoom` rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Paint { room: String, paint: Value },
    Markboard { room: String, markboard: Value },
    MarkboardReq { room: String },
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom { .. } => "leaveRoom",
            Self::Paint { .. } => EventKind::Paint.name(),
            Self::Markboard { .. } => EventKind::Markboard.name(),
            Self::MarkboardReq { .. } => EventKind::MarkboardReq.name(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Outbound frame pushed to fan-out targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    Paint { room: RoomId, paint: Value },
    Markboard { room: RoomId, markboard: Value },
    MarkboardReq { room: RoomId },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Paint { .. } => EventKind::Paint,
            Self::Markboard { .. } => EventKind::Markboard,
            Self::MarkboardReq { .. } => EventKind::MarkboardReq,
        }
    }

    pub fn room(&self) -> &RoomId {
        match self {
            Self::Paint { room, .. } | Self::Markboard { room, .. } | Self::MarkboardReq { room } => {
                room
            }
        }
    }

    /// Serialize once into a shareable frame.
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
}
