//! In-process transport.
//!
//! Both ends of the link live in the same process, which makes this the
//! transport of choice for tests and demos. Its behavior is also the yardstick
//! for network transports; where one of those cannot match it, the difference
//! is documented on that transport.
//!
//! ## Behavior
//!
//! - The connection is `Open` as soon as the factory returns.
//! - `poll_once()` never waits and returns inbound texts in arrival order.
//! - `send()` on a connection that is not `Open` fails with `NoConnection`.
//! - `close()` is idempotent and leaves the connection `Closed`.
//!
//! ## The peer handle
//!
//! [`create_memory_transport`] returns the transport together with a
//! [`MemoryPeer`], which plays the remote end of the link: it delivers
//! inbound texts, observes everything the session sent, and can drop the
//! connection from the far side.
//!
//! ## Non-Goals
//!
//! This transport does not emulate a middleware server: nothing is routed,
//! acknowledged, or broadcast unless the peer handle does it explicitly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::macros::log_debug;
use crate::pending::lock_ignore_poison;
use crate::{
    // ---
    codec,
    ConnectionState,
    Envelope,
    Error,
    Result,
    Transport,
    TransportPtr,
};

/// State shared by both ends of an in-memory link.
struct Link {
    // ---
    inbound: Mutex<VecDeque<String>>,
    sent_log: Mutex<Vec<String>>,
    state: AtomicU8,
}

impl Link {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// In-memory transport.
///
/// The session side of an in-memory link.
struct MemoryTransport {
    // ---
    link: Arc<Link>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---

    /// Record the text and hand it to the peer.
    async fn send(&self, text: String) -> Result<()> {
        // ---
        if self.link.state() != ConnectionState::Open {
            return Err(Error::NoConnection);
        }

        lock_ignore_poison(&self.link.sent_log).push(text.clone());

        // The receiver lives in the peer; a dropped peer simply stops listening.
        let _ = self.outbound.send(text);
        Ok(())
    }

    /// Drain everything the peer delivered since the last call.
    async fn poll_once(&self) -> Result<Vec<String>> {
        // ---
        let mut inbound = lock_ignore_poison(&self.link.inbound);
        Ok(inbound.drain(..).collect())
    }

    fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Close the link. Safe to call repeatedly.
    async fn close(&self) -> Result<()> {
        // ---
        if self.link.state() != ConnectionState::Closed {
            log_debug!("memory transport: closing");
            self.link.set_state(ConnectionState::Closed);
        }
        Ok(())
    }
}

/// The remote end of an in-memory link.
///
/// # ⚠️  Testing Aid
///
/// The peer handle exists to script the server side of a conversation in
/// tests and demos. It is not a broker.
pub struct MemoryPeer {
    // ---
    link: Arc<Link>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryPeer {
    // ---

    /// Queue a raw text for the session's next poll.
    pub fn deliver(&self, text: impl Into<String>) {
        lock_ignore_poison(&self.link.inbound).push_back(text.into());
    }

    /// Encode and queue an envelope for the session's next poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope fails to encode.
    pub fn deliver_envelope(&self, envelope: &Envelope) -> Result<()> {
        // ---
        let text = codec::encode(envelope)?;
        self.deliver(text);
        Ok(())
    }

    /// Every text the session has sent so far, oldest first.
    pub fn sent(&self) -> Vec<String> {
        lock_ignore_poison(&self.link.sent_log).clone()
    }

    /// Wait for the next text the session sends.
    ///
    /// Returns `None` once the transport has been dropped and every sent text
    /// has been consumed.
    pub async fn next_sent(&self) -> Option<String> {
        self.outbound.lock().await.recv().await
    }

    /// Wait for the next text the session sends and decode it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConnection`] if the transport is gone, or
    /// [`Error::MalformedMessage`] if the text does not decode.
    pub async fn next_sent_envelope(&self) -> Result<Envelope> {
        // ---
        let text = self.next_sent().await.ok_or(Error::NoConnection)?;
        codec::decode(&text)
    }

    /// Drop the connection from the remote side.
    pub fn disconnect(&self) {
        // ---
        log_debug!("memory transport: peer disconnected");
        self.link.set_state(ConnectionState::Closed);
    }

    /// Current state of the link.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }
}

/// Create a connected in-memory transport and the peer that drives it.
///
/// # Example
///
/// ```
/// # use middleware_client::{create_memory_transport, ConnectionState};
/// let (transport, peer) = create_memory_transport();
/// assert_eq!(transport.connection_state(), ConnectionState::Open);
///
/// peer.disconnect();
/// assert_eq!(transport.connection_state(), ConnectionState::Closed);
/// ```
pub fn create_memory_transport() -> (TransportPtr, MemoryPeer) {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();

    let link = Arc::new(Link {
        inbound: Mutex::new(VecDeque::new()),
        sent_log: Mutex::new(Vec::new()),
        state: AtomicU8::new(ConnectionState::Open.as_u8()),
    });

    let transport = MemoryTransport {
        link: link.clone(),
        outbound: tx,
    };
    let peer = MemoryPeer {
        link,
        outbound: tokio::sync::Mutex::new(rx),
    };

    (Arc::new(transport), peer)
}
