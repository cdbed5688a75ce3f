//! WebSocket client for the markboard relay.
//!
//! Provides:
//! - Connection lifecycle (connect, automatic re-join of the current room)
//! - Room switching with a single `joinRoom`; the server moves the
//!   connection out of its previous room
//! - Paint / full-board send and receive
//! - Board state requests, with last-write-wins tracking of answers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::protocol::{ClientEvent, ProtocolError, RoomId, ServerEvent};
use crate::reconcile::LatestBoard;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Drawing operation from a room peer
    Paint { room: RoomId, paint: Value },
    /// Full-board snapshot from a room peer
    Markboard { room: RoomId, markboard: Value },
    /// A room peer asked for the current board
    MarkboardRequested { room: RoomId },
}

impl From<ServerEvent> for RelayEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Paint { room, paint } => Self::Paint { room, paint },
            ServerEvent::Markboard { room, markboard } => Self::Markboard { room, markboard },
            ServerEvent::MarkboardReq { room } => Self::MarkboardRequested { room },
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("not in a room")]
    NoRoom,
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The relay client.
pub struct RelayClient {
    server_url: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Bumped on every connect/disconnect so a stale reader task can tell
    /// it no longer owns the connection state
    generation: Arc<AtomicU64>,

    /// Room we are in, or will join on connect
    current_room: Arc<RwLock<Option<RoomId>>>,

    /// Most recent full-board snapshot received
    latest_board: Arc<RwLock<LatestBoard>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Reader task of the live connection
    reader: Option<JoinHandle<()>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<RelayEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<RelayEvent>,
}

impl RelayClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            current_room: Arc::new(RwLock::new(None)),
            latest_board: Arc::new(RwLock::new(LatestBoard::new())),
            outgoing_tx: None,
            reader: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and re-join the current room, if any.
    ///
    /// An existing connection is closed first. Spawns background tasks for
    /// reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.outgoing_tx.is_some() {
            log::debug!("Replacing existing connection to {}", self.server_url);
            self.close_transport().await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = msg.is_close();
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        let room = self.current_room.read().await.clone();
        if let Some(room) = room {
            self.send(ClientEvent::JoinRoom { room: room.into() }).await?;
        }

        // Reader task: process incoming WebSocket messages
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let current_generation = self.generation.clone();
        let latest_board = self.latest_board.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => ServerEvent::decode(text.as_str()),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };
                match event {
                    Ok(event) => {
                        if let ServerEvent::Markboard { room, markboard } = &event {
                            latest_board.write().await.apply(room.clone(), markboard.clone());
                        }
                        let _ = event_tx.send(event.into()).await;
                    }
                    Err(e) => log::warn!("Ignoring undecodable frame from relay: {e}"),
                }
            }

            // Connection lost, unless it was already replaced or closed on purpose
            let lost = {
                let mut state = state.write().await;
                let owned = current_generation.load(Ordering::SeqCst) == generation;
                if owned {
                    *state = ConnectionState::Disconnected;
                }
                owned
            };
            if lost {
                let _ = event_tx.send(RelayEvent::Disconnected).await;
            }
        }));

        Ok(())
    }

    /// Switch to `room`.
    ///
    /// While disconnected the room is only recorded and joined on connect.
    pub async fn join_room(&self, room: &str) -> Result<RoomId, ClientError> {
        let room = RoomId::parse(room)?;
        {
            let mut current = self.current_room.write().await;
            if current.as_ref() != Some(&room) {
                self.latest_board.write().await.reset();
            }
            *current = Some(room.clone());
        }
        if self.connection_state().await == ConnectionState::Connected {
            self.send(ClientEvent::JoinRoom { room: room.clone().into() }).await?;
        }
        Ok(room)
    }

    /// Leave the current room.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        let room = self.current_room.write().await.take().ok_or(ClientError::NoRoom)?;
        self.latest_board.write().await.reset();
        if self.connection_state().await == ConnectionState::Connected {
            self.send(ClientEvent::LeaveRoom { room: room.into() }).await?;
        }
        Ok(())
    }

    /// Send a drawing operation to the current room.
    pub async fn send_paint(&self, paint: Value) -> Result<(), ClientError> {
        let room = self.require_room().await?;
        self.send(ClientEvent::Paint { room, paint }).await
    }

    /// Send a full-board snapshot to the current room.
    pub async fn send_markboard(&self, markboard: Value) -> Result<(), ClientError> {
        let room = self.require_room().await?;
        self.send(ClientEvent::Markboard { room, markboard }).await
    }

    /// Ask the current room for its board.
    pub async fn request_markboard(&self) -> Result<(), ClientError> {
        let room = self.require_room().await?;
        self.send(ClientEvent::MarkboardReq { room }).await
    }

    async fn require_room(&self) -> Result<String, ClientError> {
        self.current_room
            .read()
            .await
            .clone()
            .map(String::from)
            .ok_or(ClientError::NoRoom)
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        let text = event.encode()?;
        tx.send(Message::Text(text.into()))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Close the connection. The current room is kept and re-joined by the
    /// next [`connect`](Self::connect).
    pub async fn disconnect(&mut self) {
        if self.close_transport().await {
            let _ = self.event_tx.send(RelayEvent::Disconnected).await;
        }
    }

    /// Stop the reader, send a close frame and mark the client disconnected.
    /// Returns whether it was connected.
    async fn close_transport(&mut self) -> bool {
        let was_connected = {
            let mut state = self.state.write().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *state, ConnectionState::Disconnected) != ConnectionState::Disconnected
        };
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        was_connected
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn current_room(&self) -> Option<RoomId> {
        self.current_room.read().await.clone()
    }

    /// Last board snapshot received for the current room.
    pub async fn latest_board(&self) -> Option<Value> {
        self.latest_board.read().await.board().cloned()
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
