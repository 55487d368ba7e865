//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait. Network
//! transports sit behind feature flags and are exposed only through
//! constructor functions; session code never names a concrete transport type.

mod memory;

#[cfg(feature = "transport_websocket")]
mod websocket;

pub use memory::{create_memory_transport, MemoryPeer};

#[cfg(feature = "transport_websocket")]
pub use websocket::create_websocket_transport;

use crate::{Error, Result, TransportPtr};

/// Connect to `url` with the transport its scheme selects.
///
/// | Scheme | Transport | Feature |
/// |--------|-----------|---------|
/// | `ws://`, `wss://` | WebSocket | `transport_websocket` |
///
/// # Errors
///
/// Returns [`Error::Transport`] for an unsupported scheme, for a scheme whose
/// feature is disabled, or when the connection cannot be established.
pub async fn create_transport(url: &str) -> Result<TransportPtr> {
    // ---
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| Error::Transport(format!("missing URL scheme: {url}")))?;

    match scheme.as_str() {
        #[cfg(feature = "transport_websocket")]
        "ws" | "wss" => create_websocket_transport(url).await,

        #[cfg(not(feature = "transport_websocket"))]
        "ws" | "wss" => Err(Error::Transport(format!(
            "{url}: websocket support requires the `transport_websocket` feature"
        ))),

        other => Err(Error::Transport(format!(
            "unsupported URL scheme `{other}`: {url}"
        ))),
    }
}
