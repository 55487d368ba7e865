// src/transport/websocket.rs

//! WebSocket transport.
//!
//! Connects to the middleware server with `tokio-tungstenite` and adapts the
//! socket to the polling [`Transport`] contract:
//!
//! - the write half sits behind an async mutex so callers on any task can
//!   `send()` while the dispatcher polls
//! - a reader task moves inbound text frames into a queue that `poll_once()`
//!   drains
//! - a close frame, end of stream, or read error marks the connection
//!   `Closed`, which the dispatcher observes at the end of its next cycle
//!
//! Binary frames are not part of the protocol and are dropped. Pings are
//! answered by tungstenite itself as part of reading.
//!
//! Dropping the transport aborts the reader task, which owns the read half,
//! so the socket is released even if `close()` was never called.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::macros::{log_debug, log_info, log_warn};
use crate::pending::lock_ignore_poison;
use crate::{ConnectionState, Error, Result, Transport, TransportPtr};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the transport and its reader task.
struct Shared {
    // ---
    inbound: Mutex<VecDeque<String>>,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

struct WebSocketTransport {
    // ---
    url: String,
    writer: tokio::sync::Mutex<SplitSink<WsStream, WsMessage>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    // ---

    async fn send(&self, text: String) -> Result<()> {
        // ---
        if self.shared.state() != ConnectionState::Open {
            return Err(Error::NoConnection);
        }

        let mut writer = self.writer.lock().await;
        writer
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::Transport(format!("{}: send failed: {e}", self.url)))
    }

    async fn poll_once(&self) -> Result<Vec<String>> {
        // ---
        let mut inbound = lock_ignore_poison(&self.shared.inbound);
        Ok(inbound.drain(..).collect())
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.shared.state().is_closed_or_closing() {
            return Ok(());
        }

        log_info!("{}: closing websocket", self.url);
        self.shared.set_state(ConnectionState::Closing);

        let result = {
            let mut writer = self.writer.lock().await;
            writer.close().await
        };

        self.shared.set_state(ConnectionState::Closed);
        if let Some(reader) = lock_ignore_poison(&self.reader).take() {
            reader.abort();
        }

        result.map_err(|e| Error::Transport(format!("{}: close failed: {e}", self.url)))
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        // ---
        if let Some(reader) = lock_ignore_poison(&self.reader).take() {
            log_debug!("{}: transport dropped, stopping reader", self.url);
            reader.abort();
        }
    }
}

async fn read_loop(url: String, mut stream: SplitStream<WsStream>, shared: Arc<Shared>) {
    // ---
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                lock_ignore_poison(&shared.inbound).push_back(text);
            }
            Ok(WsMessage::Binary(_)) => {
                log_warn!("{url}: ignoring binary frame");
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
            Ok(WsMessage::Close(reason)) => {
                log_info!("{url}: server closed connection: {reason:?}");
                break;
            }
            Err(_err) => {
                log_warn!("{url}: read failed: {_err}");
                break;
            }
        }
    }

    log_debug!("{url}: reader stopped");
    shared.set_state(ConnectionState::Closed);
}

/// Connect to a middleware server over WebSocket.
///
/// Resolves once the handshake completes; the returned transport is `Open`.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the URL is invalid or the handshake fails.
pub async fn create_websocket_transport(url: &str) -> Result<TransportPtr> {
    // ---
    log_debug!("{url}: connecting");

    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| Error::Transport(format!("{url}: connect failed: {e}")))?;

    log_info!("{url}: connected");

    let (writer, reader) = socket.split();

    let shared = Arc::new(Shared {
        inbound: Mutex::new(VecDeque::new()),
        state: AtomicU8::new(ConnectionState::Open.as_u8()),
    });

    let reader_task = tokio::spawn(read_loop(url.to_owned(), reader, shared.clone()));

    Ok(Arc::new(WebSocketTransport {
        url: url.to_owned(),
        writer: tokio::sync::Mutex::new(writer),
        shared,
        reader: Mutex::new(Some(reader_task)),
    }))
}
