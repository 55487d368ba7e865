use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique correlation identifier linking a request to its reply.
///
/// Correlation IDs travel *in-band* as the envelope's `RequestId` field and
/// are opaque to the transport layer.
///
/// # Format
///
/// Ids produced by [`UuidGenerator`] use the standard 36-byte UUID string
/// form: `550e8400-e29b-41d4-a9b6-446655440000`. Ids received from a peer
/// are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---

    /// Generate a new random correlation ID.
    pub fn generate() -> Self {
        // ---
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        // ---
        &self.0
    }

    /// Returns true if the id carries no characters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh correlation ids for outbound requests.
///
/// A session asks its generator for one id per request. Ids must be unique
/// among the requests that are pending at the same time; a generator that
/// repeats itself surfaces as [`Error::DuplicateRequestId`](crate::Error).
pub trait IdGenerator: Send + Sync {
    /// Produce the next correlation id.
    fn generate(&self) -> CorrelationId;
}

/// Default generator backed by random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> CorrelationId {
        CorrelationId::generate()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> CorrelationId + Send + Sync,
{
    fn generate(&self) -> CorrelationId {
        self()
    }
}

/// Shared generator pointer held by a session.
pub type IdGeneratorPtr = Arc<dyn IdGenerator>;
