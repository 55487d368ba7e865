// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the connection interface consumed by the dispatch
//! engine. It intentionally avoids any reference to concrete protocols,
//! framing, handshakes, or client libraries: the engine only ever sees raw
//! text going out and raw text coming in.
//!
//! The transport is responsible only for moving text. Correlation, routing,
//! and callback delivery are handled by the session and dispatcher.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    // ---
    /// Handshake in progress.
    Connecting,

    /// Ready for traffic.
    Open,

    /// Orderly shutdown requested, not yet complete.
    Closing,

    /// No further traffic possible.
    Closed,
}

impl ConnectionState {
    /// True for `Closing` and `Closed`.
    pub fn is_closed_or_closing(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }

    pub(crate) fn as_u8(self) -> u8 {
        // ---
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        // ---
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Transport abstraction.
///
/// A `Transport` moves raw text between this process and the middleware
/// server. It defines the minimal contract required by the dispatch engine
/// without committing to any specific protocol.
///
/// Implementations must ensure that:
/// - `send()` may be called from any task, concurrently with `poll_once()`.
/// - `poll_once()` never waits for traffic; it returns whatever arrived since
///   the previous call, oldest first.
/// - `close()` is idempotent.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
///
/// # Available Implementations
///
/// - `create_memory_transport` - In-memory transport (always available)
/// - `create_websocket_transport` - WebSocket client (`transport_websocket` feature)
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat the methods as
/// normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---

    /// Send one text message to the server.
    ///
    /// Delivery is best effort; success means the text was handed to the
    /// connection, not that the server processed it.
    async fn send(&self, text: String) -> Result<()>;

    /// Drain the texts that have arrived since the last call.
    async fn poll_once(&self) -> Result<Vec<String>>;

    /// Current state of the underlying connection.
    fn connection_state(&self) -> ConnectionState;

    /// Request an orderly shutdown of the connection.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - the session's callers and its dispatcher share one connection
/// - concrete transport types stay hidden behind the domain interface
pub type TransportPtr = Arc<dyn Transport>;
