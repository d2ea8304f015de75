//! Helpers for the minimal-length big-endian integers used on the wire.
//!
//! BinRPC never writes leading zero bytes: lengths, cookies and integer
//! record bodies occupy only as many bytes as their value needs. These
//! helpers keep Clippy expectations scoped to the conversion points so the
//! packet code can stay explicit about wire endianness.

/// Number of bytes needed to represent `value` without leading zero bytes.
///
/// Zero needs no bytes at all.
///
/// # Examples
///
/// ```
/// use binrpc::byte_order::minimal_len_u32;
///
/// assert_eq!(minimal_len_u32(0), 0);
/// assert_eq!(minimal_len_u32(0x7f), 1);
/// assert_eq!(minimal_len_u32(0x1234), 2);
/// assert_eq!(minimal_len_u32(u32::MAX), 4);
/// ```
#[must_use]
pub const fn minimal_len_u32(value: u32) -> usize { 4 - (value.leading_zeros() as usize / 8) }

/// Number of bytes needed to represent a 64-bit `value` without leading zero
/// bytes.
#[must_use]
pub const fn minimal_len_u64(value: u64) -> usize { 8 - (value.leading_zeros() as usize / 8) }

/// Serialise `value` in network byte order, returning the buffer and the
/// number of significant trailing bytes.
///
/// The significant bytes are `buf[4 - len..]`.
///
/// # Examples
///
/// ```
/// use binrpc::byte_order::write_minimal_u32;
///
/// let (buf, len) = write_minimal_u32(0x1234);
/// assert_eq!(&buf[4 - len..], &[0x12, 0x34]);
/// ```
#[must_use]
pub fn write_minimal_u32(value: u32) -> ([u8; 4], usize) {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let bytes = value.to_be_bytes();
    (bytes, minimal_len_u32(value))
}

/// Serialise a `u64` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use binrpc::byte_order::write_network_u64;
///
/// assert_eq!(
///     write_network_u64(0x1122_3344_5566_7788),
///     [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
/// );
/// ```
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Fold up to eight big-endian bytes into an unsigned integer.
///
/// Callers are responsible for bounding `bytes` to at most eight entries;
/// excess leading bytes are shifted out.
///
/// # Examples
///
/// ```
/// use binrpc::byte_order::read_network_uint;
///
/// assert_eq!(read_network_uint(&[]), 0);
/// assert_eq!(read_network_uint(&[0x12, 0x34]), 0x1234);
/// ```
#[must_use]
pub fn read_network_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}
