//! Error types for BinRPC client operations.

use std::io;

use crate::{error::BinRpcError, packet::PacketType};

/// Errors emitted by [`BinRpcClient`](super::BinRpcClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The request could not be encoded or the reply could not be parsed.
    #[error("packet error: {0}")]
    Packet(#[from] BinRpcError),
    /// A packet exceeded the configured size limit.
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Size of the offending packet.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// The reply carried a different cookie than the request.
    #[error("reply cookie {got:#x} does not match request cookie {expected:#x}")]
    CookieMismatch {
        /// Cookie of the request.
        expected: u32,
        /// Cookie found in the reply.
        got: u32,
    },
    /// The peer answered with a packet that is not a reply.
    #[error("unexpected {0:?} packet")]
    UnexpectedPacket(PacketType),
    /// A fault reply did not carry a code and a phrase.
    #[error("malformed fault reply")]
    MalformedFault,
    /// The peer closed the connection before a reply arrived.
    #[error("connection closed by peer")]
    Disconnected,
}
