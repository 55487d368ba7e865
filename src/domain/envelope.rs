// src/domain/envelope.rs

//! Envelope domain types.
//!
//! An [`Envelope`] is the unit exchanged with the middleware server. It carries
//! a [`MessageKind`], a correlation id, a command, a channel, the peer ids used
//! for point-to-point routing, and an opaque text payload.
//!
//! The dispatch engine interprets only `kind` and `request_id`; everything else
//! is carried through untouched.

use std::fmt;

use crate::{CorrelationId, Error, Result};

/// The four kinds of message understood by the middleware.
///
/// Requests expect a matching response from the server; updates are
/// one-way. Responses complete a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // ---
    /// A request expecting a `ResponseSuccess` or `ResponseError`.
    Request,

    /// A one-way notification.
    Update,

    /// Failed completion of an earlier request.
    ResponseError,

    /// Successful completion of an earlier request.
    ResponseSuccess,
}

impl MessageKind {
    /// Integer value used on the wire.
    pub fn as_wire(self) -> u8 {
        // ---
        match self {
            MessageKind::Request => 0,
            MessageKind::Update => 1,
            MessageKind::ResponseError => 2,
            MessageKind::ResponseSuccess => 3,
        }
    }

    /// True for the two response kinds.
    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::ResponseError | MessageKind::ResponseSuccess)
    }
}

impl TryFrom<i64> for MessageKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        // ---
        match value {
            0 => Ok(MessageKind::Request),
            1 => Ok(MessageKind::Update),
            2 => Ok(MessageKind::ResponseError),
            3 => Ok(MessageKind::ResponseSuccess),
            other => Err(Error::MalformedMessage(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Request => "REQUEST",
            MessageKind::Update => "UPDATE",
            MessageKind::ResponseError => "RESPONSE_ERROR",
            MessageKind::ResponseSuccess => "RESPONSE_SUCCESS",
        };
        f.write_str(name)
    }
}

/// Command names understood by the middleware server.
///
/// Commands are opaque to the dispatch engine; these constants name the ones
/// used by the built-in [`Session`](crate::Session) operations.
pub mod commands {
    /// Add the caller as a subscriber to a channel's broadcasts.
    pub const SUBSCRIBE_TO_CHANNEL: &str = "SUBSCRIBETOCHANNEL";
    /// Remove the caller's subscription from a channel.
    pub const REMOVE_SUBSCRIPTION: &str = "REMOVESUBSCRIPTION";
    /// Send a message to one named recipient on a channel.
    pub const SEND_MESSAGE: &str = "SENDMESSAGE";
    /// Register the caller as the handler for all requests on a channel.
    pub const ADD_LISTENER: &str = "ADDLISTENER";
    /// Send a request to a channel's listener.
    pub const SEND_REQUEST: &str = "SENDREQUEST";
    /// Broadcast a message to every subscriber of a channel.
    pub const PUBLISH_MESSAGE: &str = "PUBLISHMESSAGE";
    /// Authenticate the connection.
    pub const LOGIN: &str = "DOLOGIN";
}

/// A structured middleware message.
///
/// # Examples
///
/// ```
/// # use middleware_client::{Envelope, MessageKind, CorrelationId};
/// let envelope = Envelope::request(
///     CorrelationId::from("123"),
///     "SENDREQUEST",
///     "TestChannel",
///     "hello",
/// );
///
/// assert_eq!(envelope.kind, MessageKind::Request);
/// assert!(envelope.destination_id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    // ---
    /// Message kind.
    pub kind: MessageKind,

    /// Correlation id. Empty for most updates.
    pub request_id: String,

    /// Operation name, e.g. `SENDREQUEST`.
    pub command: String,

    /// Logical topic.
    pub channel: String,

    /// Peer that should receive the message, for point-to-point traffic.
    pub destination_id: String,

    /// Peer that originated the message. Filled in by the server on inbound
    /// traffic so that a reply can be routed back.
    pub source_id: String,

    /// Opaque application payload.
    pub payload: String,
}

impl Envelope {
    // ---

    /// Create a request envelope with no destination.
    pub fn request(
        request_id: CorrelationId,
        command: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            kind: MessageKind::Request,
            request_id: request_id.to_string(),
            command: command.into(),
            channel: channel.into(),
            destination_id: String::new(),
            source_id: String::new(),
            payload: payload.into(),
        }
    }

    /// Create a success or error response to `request_id`.
    pub fn response(request_id: impl Into<String>, success: bool, payload: impl Into<String>) -> Self {
        // ---
        let kind = if success {
            MessageKind::ResponseSuccess
        } else {
            MessageKind::ResponseError
        };

        Self {
            kind,
            request_id: request_id.into(),
            command: String::new(),
            channel: String::new(),
            destination_id: String::new(),
            source_id: String::new(),
            payload: payload.into(),
        }
    }

    /// Create an update envelope.
    pub fn update(
        command: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            kind: MessageKind::Update,
            request_id: String::new(),
            command: command.into(),
            channel: channel.into(),
            destination_id: String::new(),
            source_id: String::new(),
            payload: payload.into(),
        }
    }

    /// Set the destination peer id.
    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = destination_id.into();
        self
    }

    /// Set the source peer id.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }
}
