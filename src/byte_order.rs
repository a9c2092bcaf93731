//! Helpers for the big-endian length prefix carried by every frame.
//!
//! These helpers keep Clippy expectations scoped to the conversion points so
//! the codec can remain explicit about wire endianness without repeating lint
//! annotations.

/// Size of the length prefix preceding each frame payload.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Serialise a payload length in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use parley::byte_order::write_length_prefix;
///
/// assert_eq!(write_length_prefix(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
/// ```
#[must_use]
pub fn write_length_prefix(value: u32) -> [u8; LENGTH_HEADER_SIZE] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order payload length from its on-wire representation.
///
/// # Examples
///
/// ```
/// use parley::byte_order::read_length_prefix;
///
/// assert_eq!(read_length_prefix([0x00, 0x00, 0x01, 0x00]), 256);
/// ```
#[must_use]
pub fn read_length_prefix(bytes: [u8; LENGTH_HEADER_SIZE]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Read the declared payload length at the start of `src`, if the full header
/// has arrived.
#[must_use]
pub fn peek_length_prefix(src: &[u8]) -> Option<usize> {
    src.get(..LENGTH_HEADER_SIZE)
        .and_then(|slice| <[u8; LENGTH_HEADER_SIZE]>::try_from(slice).ok())
        .map(|bytes| read_length_prefix(bytes) as usize)
}
