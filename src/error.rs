//! Canonical error and result types for the crate.
//!
//! [`Error`] covers usage mistakes surfaced synchronously to callers plus the
//! transport and codec failures that tear an endpoint down. [`ReplyError`] is
//! the failure side of an ask's outcome.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;

/// Top-level error type exposed by `parley`.
#[derive(Debug, Error)]
pub enum Error {
    /// The function name is reserved for control use.
    #[error("`{0}` is a reserved function name")]
    ReservedName(String),
    /// Function names must be non-empty.
    #[error("function name must not be empty")]
    EmptyName,
    /// A handler was already registered under this name.
    #[error("a handler for `{0}` is already registered")]
    DuplicateHandler(String),
    /// The endpoint has been torn down.
    #[error("endpoint is not connected")]
    NotConnected,
    /// A message body could not be converted to JSON.
    #[error("failed to serialize message body: {0}")]
    Serialize(#[source] serde_json::Error),
    /// A protocol failure reported by the frame codec.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// An error in the underlying transport.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// An ask completed with a failure.
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

impl Error {
    /// Returns true for failures raised before any I/O was attempted.
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::ReservedName(_)
                | Self::EmptyName
                | Self::DuplicateHandler(_)
                | Self::NotConnected
                | Self::Serialize(_)
        )
    }
}

/// Failure outcome of an ask.
///
/// Remote failure detail is reduced to text on the wire; callers must not
/// rely on richer structure surviving.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The peer answered with an error.
    #[error("{0}")]
    Remote(String),
    /// The endpoint closed normally before a reply arrived.
    #[error("connection closed")]
    Closed,
    /// The endpoint was torn down by a transport or protocol failure.
    #[error("connection error: {0}")]
    ConnectionFailed(String),
}

/// Canonical result alias used by `parley` public APIs.
pub type Result<T> = std::result::Result<T, Error>;
