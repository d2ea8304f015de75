//! Packet header encoding and parsing.

use std::ops::Deref;

use super::{FIXED_HEADER_SIZE, MAGIC, MAX_HEADER_SIZE, MIN_PACKET_SIZE, PacketType, VERSION};
use crate::{
    byte_order::{read_network_uint, write_minimal_u32},
    error::BinRpcError,
};

const MAGIC_VERSION: u8 = (MAGIC << 4) | VERSION;

/// Parsed packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type announced by the sender.
    pub kind: PacketType,
    /// Body length in bytes, excluding the header.
    pub body_len: usize,
    /// Correlation cookie echoed back in the reply.
    pub cookie: u32,
    /// Number of bytes the header itself occupies.
    pub header_len: usize,
}

impl PacketHeader {
    /// Total packet length: header plus body.
    #[must_use]
    pub const fn packet_len(&self) -> usize { self.header_len + self.body_len }
}

/// An encoded header held inline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderBytes {
    buf: [u8; MAX_HEADER_SIZE],
    len: usize,
}

impl Deref for HeaderBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target { &self.buf[..self.len] }
}

/// Encode a header announcing `body_len` body bytes.
///
/// Length and cookie use the minimal number of bytes, but at least one.
///
/// # Errors
///
/// Returns [`BinRpcError::Overflow`] if `body_len` does not fit in 32 bits.
///
/// # Examples
///
/// ```
/// use binrpc::packet::{PacketType, build_header};
///
/// let hdr = build_header(PacketType::Reply, 5, 0x1234).expect("header fits");
/// assert_eq!(&hdr[..], &[0xA1, 0x11, 0x05, 0x12, 0x34]);
/// ```
pub fn build_header(
    kind: PacketType,
    body_len: usize,
    cookie: u32,
) -> Result<HeaderBytes, BinRpcError> {
    let body_len = u32::try_from(body_len).map_err(|_| BinRpcError::Overflow)?;
    let (len_bytes, len_len) = write_minimal_u32(body_len);
    let (cookie_bytes, cookie_len) = write_minimal_u32(cookie);
    let len_len = len_len.max(1);
    let cookie_len = cookie_len.max(1);

    let mut buf = [0u8; MAX_HEADER_SIZE];
    buf[0] = MAGIC_VERSION;
    #[expect(
        clippy::cast_possible_truncation,
        reason = "both lengths are in 1..=4 so the shifted values fit a byte"
    )]
    {
        buf[1] = (kind.as_u8() << 4) | (((len_len - 1) as u8) << 2) | ((cookie_len - 1) as u8);
    }
    let mut pos = FIXED_HEADER_SIZE;
    buf[pos..pos + len_len].copy_from_slice(&len_bytes[4 - len_len..]);
    pos += len_len;
    buf[pos..pos + cookie_len].copy_from_slice(&cookie_bytes[4 - cookie_len..]);
    pos += cookie_len;
    Ok(HeaderBytes { buf, len: pos })
}

/// Parse the header at the start of `buf`.
///
/// Only the header is inspected; callers compare
/// [`PacketHeader::packet_len`] with the bytes available to decide whether
/// the body is complete.
///
/// # Errors
///
/// - [`BinRpcError::MoreData`] when `buf` is shorter than the header.
/// - [`BinRpcError::BadPacket`] on a wrong magic/version byte or an unknown packet type.
pub fn parse_header(buf: &[u8]) -> Result<PacketHeader, BinRpcError> {
    if buf.len() < MIN_PACKET_SIZE {
        return Err(BinRpcError::MoreData);
    }
    if buf[0] != MAGIC_VERSION {
        return Err(BinRpcError::BadPacket);
    }
    let kind = PacketType::from_u8(buf[1] >> 4).ok_or(BinRpcError::BadPacket)?;
    let len_len = usize::from((buf[1] >> 2) & 3) + 1;
    let cookie_len = usize::from(buf[1] & 3) + 1;
    let header_len = FIXED_HEADER_SIZE + len_len + cookie_len;
    if header_len > buf.len() {
        return Err(BinRpcError::MoreData);
    }
    let len_end = FIXED_HEADER_SIZE + len_len;
    let body_len = read_network_uint(&buf[FIXED_HEADER_SIZE..len_end]);
    let cookie = read_network_uint(&buf[len_end..header_len]);
    Ok(PacketHeader {
        kind,
        body_len: usize::try_from(body_len).map_err(|_| BinRpcError::BadPacket)?,
        cookie: u32::try_from(cookie).map_err(|_| BinRpcError::BadPacket)?,
        header_len,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(PacketType::Request, 0, 0)]
    #[case(PacketType::Reply, 300, 0xdead_beef)]
    #[case(PacketType::Fault, 70_000, 7)]
    fn parse_reads_back_built_headers(
        #[case] kind: PacketType,
        #[case] body_len: usize,
        #[case] cookie: u32,
    ) {
        let hdr = build_header(kind, body_len, cookie).expect("build header");
        let parsed = parse_header(&hdr).expect("parse header");
        assert_eq!(parsed.kind, kind);
        assert_eq!(parsed.body_len, body_len);
        assert_eq!(parsed.cookie, cookie);
        assert_eq!(parsed.header_len, hdr.len());
    }

    #[test]
    fn short_buffers_need_more_data() {
        assert_eq!(parse_header(&[0xA1, 0x00]), Err(BinRpcError::MoreData));
        // four length bytes announced, only one present
        assert_eq!(
            parse_header(&[0xA1, 0x0c, 0x00, 0x00]),
            Err(BinRpcError::MoreData)
        );
    }

    #[rstest]
    #[case(&[0xB1, 0x00, 0x00, 0x00])]
    #[case(&[0xA2, 0x00, 0x00, 0x00])]
    #[case(&[0xA1, 0x20, 0x00, 0x00])]
    fn corrupt_headers_are_rejected(#[case] buf: &[u8]) {
        assert_eq!(parse_header(buf), Err(BinRpcError::BadPacket));
    }
}
