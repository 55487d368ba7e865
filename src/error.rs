use thiserror::Error;

/// Errors that can occur while exchanging messages with the middleware
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound text could not be decoded into an envelope
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A reply arrived for a request id that is not pending
    #[error("no pending request for id: {0}")]
    NoSuchPending(String),

    /// A request id was registered while an earlier request with the same id
    /// is still pending
    #[error("request id already pending: {0}")]
    DuplicateRequestId(String),

    /// The session has no live transport
    #[error("no live connection")]
    NoConnection,

    /// An operation was called with arguments it cannot act on
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation is not valid in the current dispatcher state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Connection level failure reported by a concrete transport
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for middleware operations
pub type Result<T> = std::result::Result<T, Error>;
