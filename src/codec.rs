//! Length-prefixed JSON framing.
//!
//! Every frame on the wire is a 4-byte big-endian payload length followed by
//! that many bytes of UTF-8 JSON. [`JsonFrameCodec`] implements the Tokio
//! codec traits so connections can be driven through `FramedRead` and
//! `FramedWrite`; [`encode`] and [`FrameDecoder`] expose the same behaviour for
//! callers that manage their own buffers.
//!
//! # Error Handling
//!
//! The codec reports failures through [`CodecError`]. Any decoding error is
//! fatal: once the decoder has rejected a frame it refuses further input with
//! [`FramingError::Halted`], and the owner is expected to tear the stream down.

use std::{fmt, marker::PhantomData};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    byte_order::{LENGTH_HEADER_SIZE, peek_length_prefix, write_length_prefix},
    message::Message,
};

pub mod error;

pub use error::{CodecError, EofError, FeedError, FramingError};

/// Maximum frame payload length in bytes (10 MiB).
pub const MAX_FRAME_LENGTH: usize = 10 * 1024 * 1024;

/// Encode `value` as a single frame using the default size limit.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if `value` cannot be serialised and
/// [`FramingError::OversizedFrame`] if the payload exceeds
/// [`MAX_FRAME_LENGTH`].
///
/// # Examples
///
/// ```
/// use parley::codec::encode;
///
/// let frame = encode(&serde_json::json!({"testObject": true})).expect("encode");
/// assert_eq!(frame.len(), 23);
/// assert_eq!(&frame[..4], &[0, 0, 0, 19]);
/// ```
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    encode_with_limit(value, MAX_FRAME_LENGTH)
}

/// Encode `value` as a single frame, rejecting payloads over
/// `max_frame_length` bytes.
///
/// # Errors
///
/// As [`encode`], with `max_frame_length` in place of [`MAX_FRAME_LENGTH`].
pub fn encode_with_limit<T: Serialize>(
    value: &T,
    max_frame_length: usize,
) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::new();
    encode_into(value, max_frame_length, &mut dst)?;
    Ok(dst.freeze())
}

fn encode_into<T: Serialize>(
    value: &T,
    max_frame_length: usize,
    dst: &mut BytesMut,
) -> Result<(), CodecError> {
    let payload = serde_json::to_vec(value).map_err(CodecError::Malformed)?;
    let oversized = || {
        CodecError::Framing(FramingError::OversizedFrame {
            size: payload.len(),
            max: max_frame_length,
        })
    };
    if payload.len() > max_frame_length {
        return Err(oversized());
    }
    let len = u32::try_from(payload.len()).map_err(|_| oversized())?;
    dst.reserve(LENGTH_HEADER_SIZE + payload.len());
    dst.put_slice(&write_length_prefix(len));
    dst.put_slice(&payload);
    Ok(())
}

/// Tokio codec translating between frames and JSON values of type `T`.
///
/// A decoder instance belongs to exactly one stream. It becomes unusable after
/// the first protocol error.
pub struct JsonFrameCodec<T = Message> {
    max_frame_length: usize,
    halted: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonFrameCodec<T> {
    /// Construct a codec that rejects payloads longer than `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            halted: false,
            _item: PhantomData,
        }
    }

    /// Return the maximum frame length accepted by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Returns true once the decoder has rejected input.
    #[must_use]
    pub fn is_halted(&self) -> bool { self.halted }

    fn halt(&mut self, err: CodecError) -> CodecError {
        self.halted = true;
        err
    }
}

impl<T> Default for JsonFrameCodec<T> {
    fn default() -> Self { Self::new(MAX_FRAME_LENGTH) }
}

impl<T> fmt::Debug for JsonFrameCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFrameCodec")
            .field("max_frame_length", &self.max_frame_length)
            .field("halted", &self.halted)
            .finish()
    }
}

impl<T: DeserializeOwned> Decoder for JsonFrameCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.halted {
            return Err(FramingError::Halted.into());
        }
        let Some(len) = peek_length_prefix(src) else {
            return Ok(None);
        };
        if len > self.max_frame_length {
            let max = self.max_frame_length;
            return Err(self.halt(FramingError::OversizedFrame { size: len, max }.into()));
        }
        let frame_len = LENGTH_HEADER_SIZE + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_HEADER_SIZE);
        let payload = src.split_to(len);
        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(self.halt(CodecError::Malformed(e))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        // Clean close: no data remaining at frame boundary
        if src.is_empty() {
            return Ok(None);
        }
        Err(self.halt(build_eof_error(src).into()))
    }
}

/// Build the appropriate EOF error based on remaining buffer state.
///
/// - [`EofError::MidHeader`]: fewer than 4 bytes received.
/// - [`EofError::MidFrame`]: header complete but payload truncated.
fn build_eof_error(src: &BytesMut) -> EofError {
    let bytes_received = src.len();
    match peek_length_prefix(src) {
        Some(expected) => EofError::MidFrame {
            bytes_received: bytes_received.saturating_sub(LENGTH_HEADER_SIZE),
            expected,
        },
        None => EofError::MidHeader {
            bytes_received,
            header_size: LENGTH_HEADER_SIZE,
        },
    }
}

impl<T: Serialize> Encoder<T> for JsonFrameCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, self.max_frame_length, dst)
    }
}

/// Incremental decoder for callers that receive raw chunks themselves.
///
/// # Examples
///
/// ```
/// use parley::codec::{FrameDecoder, encode};
/// use serde_json::{Value, json};
///
/// let frame = encode(&json!("hello")).expect("encode");
/// let mut decoder = FrameDecoder::<Value>::new();
/// assert!(decoder.feed(&frame[..3]).expect("partial").is_empty());
/// assert_eq!(decoder.feed(&frame[3..]).expect("rest"), vec![json!("hello")]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder<T = Message> {
    codec: JsonFrameCodec<T>,
    buffer: BytesMut,
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    /// Create a decoder using [`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new() -> Self { Self::with_max_frame_length(MAX_FRAME_LENGTH) }

    /// Create a decoder with a custom payload limit.
    #[must_use]
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            codec: JsonFrameCodec::new(max_frame_length),
            buffer: BytesMut::new(),
        }
    }

    /// Append `chunk` and return every message it completes, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] for oversized or malformed frames, carrying the
    /// messages completed before the bad frame. The decoder then refuses all
    /// further input.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<T>, FeedError<T>> {
        if self.codec.is_halted() {
            return Err(FeedError::new(Vec::new(), FramingError::Halted.into()));
        }
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(item)) => out.push(item),
                Ok(None) => return Ok(out),
                Err(e) => return Err(FeedError::new(out, e)),
            }
        }
    }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Eof`] if a partial frame is still buffered.
    pub fn finish(mut self) -> Result<(), CodecError> {
        self.codec.decode_eof(&mut self.buffer).map(|_| ())
    }

    /// Number of bytes buffered but not yet decoded.
    #[must_use]
    pub fn buffered_len(&self) -> usize { self.buffer.len() }
}

impl<T: DeserializeOwned> Default for FrameDecoder<T> {
    fn default() -> Self { Self::new() }
}
