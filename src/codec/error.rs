//! Error types for the codec layer.
//!
//! This module provides a structured error taxonomy that distinguishes between
//! framing errors (wire-level frame boundary issues), malformed payloads,
//! I/O errors, and EOF conditions.
//!
//! # Error Categories
//!
//! - [`FramingError`]: Wire-level issues in frame structure (oversized frames, a decoder that has
//!   already failed).
//! - [`CodecError::Malformed`]: A complete frame whose payload is not valid JSON for the expected
//!   value.
//! - [`EofError`]: End-of-stream conditions distinguishing clean closure from premature
//!   disconnection.
//! - [`CodecError`]: Top-level enum wrapping all categories plus I/O errors.
//!
//! Every variant except [`EofError::CleanClose`] is fatal to the stream that
//! produced it.

use std::io;

use thiserror::Error;

/// Framing-level errors occurring during frame boundary detection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Frame length prefix indicates size exceeding configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Payload size declared by the length prefix (or produced by the encoder).
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// The decoder already reported a fatal error and refuses further input.
    #[error("decoder halted after a previous protocol error")]
    Halted,
}

/// EOF handling variants distinguishing normal vs. premature closure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// Clean EOF at frame boundary - normal socket closure.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// EOF received after the length prefix but before the full payload.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte frame received")]
    MidFrame {
        /// Payload bytes received before EOF.
        bytes_received: usize,
        /// Payload size declared by the length prefix.
        expected: usize,
    },

    /// EOF received mid-header during length prefix read.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Expected header size.
        header_size: usize,
    },
}

/// Top-level codec error taxonomy.
///
/// # Examples
///
/// ```
/// use parley::codec::{CodecError, FramingError};
///
/// let err = CodecError::Framing(FramingError::OversizedFrame {
///     size: 20_000_000,
///     max: 10_485_760,
/// });
///
/// assert!(err.to_string().contains("20000000"));
/// assert!(!err.is_clean_close());
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// Framing layer error (wire-level frame boundary issues).
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The frame payload could not be parsed (or produced) as JSON.
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End-of-stream handling.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns true if this error represents a clean connection close.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }

    /// Returns true if the peer went away mid-frame or mid-header.
    #[must_use]
    pub fn is_premature_eof(&self) -> bool {
        matches!(
            self,
            Self::Eof(EofError::MidFrame { .. } | EofError::MidHeader { .. })
        )
    }
}

/// Failure from [`FrameDecoder::feed`](super::FrameDecoder::feed).
///
/// Frames completed ahead of the failing one in the same chunk are returned in
/// `decoded`, so a batch yields the same messages however it was split.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct FeedError<T> {
    /// Messages decoded before the error, in arrival order.
    pub decoded: Vec<T>,
    /// The fatal error that halted the decoder.
    #[source]
    pub source: CodecError,
}

impl<T> FeedError<T> {
    pub(crate) fn new(decoded: Vec<T>, source: CodecError) -> Self { Self { decoded, source } }

    /// Drop the decoded prefix and keep the error.
    #[must_use]
    pub fn into_source(self) -> CodecError { self.source }
}
