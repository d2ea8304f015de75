//! Frame codec splitting a byte stream into BinRPC packets.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::ClientError;
use crate::{
    error::BinRpcError,
    packet::{PacketType, build_header, parse_header},
};

/// Largest packet the codec accepts by default.
pub const DEFAULT_MAX_PACKET: usize = 1024 * 1024;

/// One packet: header fields plus the raw body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Packet type.
    pub kind: PacketType,
    /// Correlation cookie.
    pub cookie: u32,
    /// Body bytes, header excluded.
    pub body: Bytes,
}

/// Length-delimited codec for BinRPC packets.
///
/// # Examples
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use binrpc::{
///     client::{BinRpcCodec, Frame},
///     packet::PacketType,
/// };
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = BinRpcCodec::default();
/// let mut buf = BytesMut::new();
/// let frame = Frame {
///     kind: PacketType::Request,
///     cookie: 7,
///     body: Bytes::from_static(&[0x10, 0x01]),
/// };
/// codec.encode(frame.clone(), &mut buf).expect("encode");
/// assert_eq!(codec.decode(&mut buf).expect("decode"), Some(frame));
/// assert!(buf.is_empty());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinRpcCodec {
    max_packet: usize,
}

impl Default for BinRpcCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_PACKET) }
}

impl BinRpcCodec {
    /// Codec rejecting packets longer than `max_packet` bytes.
    #[must_use]
    pub const fn new(max_packet: usize) -> Self { Self { max_packet } }

    /// Largest accepted packet.
    #[must_use]
    pub const fn max_packet(&self) -> usize { self.max_packet }
}

impl Decoder for BinRpcCodec {
    type Item = Frame;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ClientError> {
        let header = match parse_header(src) {
            Ok(header) => header,
            Err(BinRpcError::MoreData) => return Ok(None),
            Err(e) => return Err(ClientError::Packet(e)),
        };
        let packet_len = header.packet_len();
        if packet_len > self.max_packet {
            return Err(ClientError::TooLarge {
                size: packet_len,
                max: self.max_packet,
            });
        }
        if src.len() < packet_len {
            src.reserve(packet_len - src.len());
            return Ok(None);
        }
        let mut packet = src.split_to(packet_len);
        let body = packet.split_off(header.header_len).freeze();
        Ok(Some(Frame {
            kind: header.kind,
            cookie: header.cookie,
            body,
        }))
    }
}

impl Encoder<Frame> for BinRpcCodec {
    type Error = ClientError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ClientError> {
        let header = build_header(frame.kind, frame.body.len(), frame.cookie)?;
        let packet_len = header.len() + frame.body.len();
        if packet_len > self.max_packet {
            return Err(ClientError::TooLarge {
                size: packet_len,
                max: self.max_packet,
            });
        }
        dst.reserve(packet_len);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_packets_wait_for_more_bytes() {
        let mut codec = BinRpcCodec::default();
        let mut buf = BytesMut::from(&[0xA1, 0x10, 0x03, 0x09, 0x10][..]);
        assert_eq!(codec.decode(&mut buf).expect("no error"), None);
        buf.extend_from_slice(&[0x05, 0x11]);
        let frame = codec.decode(&mut buf).expect("no error").expect("complete");
        assert_eq!(frame.kind, PacketType::Reply);
        assert_eq!(frame.cookie, 9);
        assert_eq!(&frame.body[..], &[0x10, 0x05, 0x11]);
    }

    #[test]
    fn oversized_packets_are_refused() {
        let mut codec = BinRpcCodec::new(8);
        let mut buf = BytesMut::from(&[0xA1, 0x10, 0x20, 0x01][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ClientError::TooLarge { size: 36, max: 8 })
        ));
    }

    #[test]
    fn garbage_is_a_packet_error() {
        let mut codec = BinRpcCodec::default();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ClientError::Packet(BinRpcError::BadPacket))
        ));
    }
}
