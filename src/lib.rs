//! Correlated request/response and channel pub/sub over a single text connection
//!
//! This library turns a raw bidirectional text connection to a middleware
//! server into a structured messaging API. It handles correlation id
//! generation, matching replies to the requests that caused them, routing
//! unsolicited channel traffic to the application, and the lifetime of the
//! single dispatch loop that does all of this.
//!
//! ```no_run
//! use middleware_client::{RequestParams, Session};
//!
//! # async fn example() -> middleware_client::Result<()> {
//! let session = Session::connect("ws://localhost:8080").await?;
//!
//! session.register_message_callback(|_session, envelope| {
//!     println!("{}: {}", envelope.channel, envelope.payload);
//! });
//!
//! session.add_channel_listener(RequestParams::new("prices")).await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod domain;
mod transport;

mod dispatch_mode;
mod dispatcher;
mod pending;
mod session;
mod session_builder;
mod session_config;

mod correlation;
mod error;
mod macros;
mod params;

pub mod codec;

// Re-export main types
pub use session::{MessageCallback, Session};
pub use session_builder::SessionBuilder;

pub use dispatch_mode::DispatchMode;
pub use dispatcher::DispatcherState;
pub use session_config::{SessionConfig, DEFAULT_POLL_PERIOD, DEFAULT_SHUTDOWN_WAIT};

pub use correlation::{CorrelationId, IdGenerator, IdGeneratorPtr, UuidGenerator};
pub use error::{Error, Result};
pub use params::{LoginPayload, ReplyCallback, RequestParams};
pub use pending::TIMEOUT_PAYLOAD;

pub use transport::{create_memory_transport, create_transport, MemoryPeer};

#[cfg(feature = "transport_websocket")]
pub use transport::create_websocket_transport;

// --- public re-exports
pub use domain::{
    //
    commands,
    ConnectionState,
    Envelope,
    MessageKind,
    Transport,
    TransportPtr,
};
