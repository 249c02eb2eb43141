//! Unified error type for rozen operations.
//!
//! Every fallible operation in the workspace returns [`Result`]. Transport
//! callbacks never surface these errors; they log and continue so the graph
//! ingestion path stays alive.

use thiserror::Error;

/// Unified error type for all rozen operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse: null-ish handle, zero depth, unknown entity, bad name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity or its context has been shut down.
    #[error("entity has been shut down")]
    Shutdown,

    /// A per-message attachment failed to parse.
    #[error("malformed attachment: {0}")]
    MalformedAttachment(String),

    /// A liveliness token key expression failed to parse.
    #[error("malformed liveliness token: {0}")]
    MalformedToken(String),

    /// The type-support codec refused to encode a payload.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The type-support codec refused to decode a payload.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// An underlying put/get/declare failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The shared session is already closed.
    ///
    /// Publishes racing a shutdown demote this to a warning instead of
    /// surfacing it to the caller.
    #[error("session closed")]
    SessionClosed,

    /// A buffer or shared-memory allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A bounded wait exhausted its attempts.
    #[error("operation timed out")]
    Timeout,

    /// Transport configuration could not be loaded or applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type using the unified [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap any displayable transport-layer error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }

    /// Build an `InvalidArgument` from a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
