//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations, wire encodings, or infrastructure concerns.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod transport;

// --- Envelope domain re-exports ---

pub use envelope::{
    //
    commands,
    Envelope,
    MessageKind,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    ConnectionState,
    Transport,
    TransportPtr,
};
