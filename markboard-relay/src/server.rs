//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── ConnectionRegistry
//!            ├── LifecycleController ┤
//! Client B ──┘        │              └── RoomIndex
//!                     ▼
//!                EventRelay ── per-connection outbound queue ──► Client C
//! ```
//!
//! One task per connection. Inbound frames are handled in arrival order;
//! outbound frames are drained from the connection's queue in the same
//! `select!` loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::lifecycle::LifecycleController;
use crate::protocol::ProtocolError;
use crate::state::{RelayState, RelayStats};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ───────────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────────

pub const ENV_BIND_ADDR: &str = "MARKBOARD_BIND_ADDR";
pub const ENV_OUTBOUND_CAPACITY: &str = "MARKBOARD_OUTBOUND_CAPACITY";
pub const ENV_MAX_FRAME_BYTES: &str = "MARKBOARD_MAX_FRAME_BYTES";
pub const ENV_ALLOWED_ORIGIN: &str = "FRONTEND_DOMAIN";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before deliveries to it are dropped
    pub outbound_capacity: usize,
    /// Larger inbound messages are discarded before JSON decoding. They are
    /// still read into memory first, up to the transport's own message limit.
    pub max_frame_bytes: usize,
    /// Browser origin allowed to connect (None = any)
    pub allowed_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            outbound_capacity: 256,
            max_frame_bytes: 1_000_000,
            allowed_origin: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

impl ServerConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_BIND_ADDR).filter(|v| !v.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(value) = lookup(ENV_OUTBOUND_CAPACITY) {
            config.outbound_capacity = parse_positive(ENV_OUTBOUND_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_FRAME_BYTES) {
            config.max_frame_bytes = parse_positive(ENV_MAX_FRAME_BYTES, &value)?;
        }
        config.allowed_origin = lookup(ENV_ALLOWED_ORIGIN)
            .map(|origin| normalize_origin(&origin).to_string())
            .filter(|origin| !origin.is_empty());
        Ok(config)
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}

fn normalize_origin(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

/// Handshake check: reject browsers coming from a foreign origin.
///
/// Requests without an `Origin` header (native clients) are let through.
fn check_origin(
    allowed: Option<&str>,
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    let Some(allowed) = allowed else {
        return Ok(response);
    };
    let Some(origin) = request.headers().get("origin") else {
        return Ok(response);
    };
    match origin.to_str() {
        Ok(origin) if normalize_origin(origin).eq_ignore_ascii_case(allowed) => Ok(response),
        _ => {
            log::warn!("Rejecting WebSocket handshake from origin {origin:?}");
            let mut rejection = ErrorResponse::new(Some("origin not allowed".to_string()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────────

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    lifecycle: LifecycleController,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(RelayState::new());
        let lifecycle = LifecycleController::new(state, config.outbound_capacity);
        Self { config, lifecycle }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind to the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Markboard relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Failed to accept connection: {e}");
                    if let Some(pause) = accept_backoff(&e) {
                        tokio::time::sleep(pause).await;
                    }
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let lifecycle = self.lifecycle.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, lifecycle, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        lifecycle: LifecycleController,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let allowed = config.allowed_origin.clone();
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            check_origin(allowed.as_deref(), req, resp)
        })
        .await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (conn_id, mut outbound) = lifecycle.connect().await;
        log::info!("WebSocket connection {conn_id} established from {addr}");

        // No `?` past this point: teardown below must always run.
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match check_size(text.len(), config.max_frame_bytes) {
                                Ok(()) => lifecycle.handle_frame(conn_id, text.as_str()).await,
                                Err(e) => lifecycle.reject_frame(conn_id, &e),
                            }
                        }

                        Some(Ok(Message::Binary(data))) => {
                            let text = check_size(data.len(), config.max_frame_bytes).and_then(|()| {
                                std::str::from_utf8(&data).map_err(|_| ProtocolError::InvalidUtf8)
                            });
                            match text {
                                Ok(text) => lifecycle.handle_frame(conn_id, text).await,
                                Err(e) => lifecycle.reject_frame(conn_id, &e),
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {conn_id} closed by {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                                log::debug!("Write to {conn_id} failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        lifecycle.disconnect(conn_id).await;
        Ok(())
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> RelayStats {
        self.lifecycle.state().stats().await
    }

    /// Shared membership state, for inspection.
    pub fn state(&self) -> &Arc<RelayState> {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// How long to pause after a failed `accept`.
///
/// Errors tied to a single peer are retried at once. Anything else (file
/// descriptor exhaustion and the like) would fail again immediately, so the
/// loop backs off instead of spinning.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), ProtocolError> {
    if size > limit {
        return Err(ProtocolError::FrameTooLarge { size, limit });
    }
    Ok(())
}
