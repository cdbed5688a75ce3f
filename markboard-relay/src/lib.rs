//! # markboard-relay: Real-time event relay for the collaborative markboard
//!
//! Clients hold a WebSocket open, join a named room, and exchange drawing
//! and board-sync events that are fanned out to every other member of the
//! room. The relay stores nothing: a room exists only while it has members.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    WebSocket     ┌─────────────────────┐
//! │ RelayClient │ ◄──────────────► │ RelayServer         │
//! │ (per user)  │    JSON frames   │  LifecycleController│
//! └─────────────┘                  └──────────┬──────────┘
//!                                             │
//!                            ┌────────────────┼────────────────┐
//!                            ▼                ▼                ▼
//!                   ConnectionRegistry    RoomIndex       EventRelay
//!                            └──── RelayState (one RwLock) ────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events and validated room keys
//! - [`registry`]: live connections, their rooms and outbound queues
//! - [`rooms`]: room → members, with atomic room switch
//! - [`state`]: the lock that keeps registry and rooms consistent
//! - [`relay`]: best-effort fan-out excluding the sender
//! - [`reconcile`]: board state requests for late joiners
//! - [`lifecycle`]: connect / join / leave / disconnect and dispatch
//! - [`server`]: WebSocket server and configuration
//! - [`client`]: WebSocket client

pub mod error;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod state;
pub mod relay;
pub mod reconcile;
pub mod lifecycle;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use error::{DeliveryFailure, RelayError};
pub use protocol::{BoardEvent, ClientEvent, EventKind, Frame, ProtocolError, RoomId, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use rooms::{RoomIndex, RoomSwitch};
pub use state::{Membership, RelayState, RelayStats};
pub use relay::{EventRelay, FanOut};
pub use reconcile::LatestBoard;
pub use lifecycle::{ConnectionPhase, LifecycleController};
pub use server::{ConfigError, RelayServer, ServerConfig};
pub use client::{ClientError, ConnectionState, RelayClient, RelayEvent};
