//! Error taxonomy for the synchronization engine.
//!
//! No handler in this crate may crash the process on a single bad input:
//! transport failures route to the durable offline queue, validation
//! failures carry a precise index back to the sender, and persistence
//! failures are retried then logged. Conflicts are not errors at all.

use thiserror::Error;

/// Failures at the KV-store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record under {key}/{field}: {source}")]
    Corrupt {
        key: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures at the pub/sub boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("topic {0} closed")]
    Closed(String),
    #[error("subscriber lagged behind on {0}, {1} messages dropped")]
    Lagged(String, u64),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures crossing the request/response boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never reached the server (network down, peer gone).
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unknown identity {0}")]
    UnknownIdentity(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single modification failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("y {0} outside [0, 255]")]
    HeightOutOfRange(i32),
    #[error("|{0}| exceeds the coordinate bound {1}")]
    CoordOutOfRange(i32, i32),
}
