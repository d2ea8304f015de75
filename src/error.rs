//! Canonical error types for the crate.
//!
//! The taxonomy follows the layers of the engine:
//!
//! - [`BinRpcError`]: packet-level failures raised by the encoder and the record reader. Each
//!   variant carries a stable negative code so fault phrases and logs match what BinRPC peers
//!   expect.
//! - [`SendError`]: failures reported by a [`Transport`](crate::transport::Transport).
//! - [`RpcError`]: errors surfaced to command handlers through the [`Rpc`](crate::rpc::Rpc)
//!   callback surface.

use std::io;

use thiserror::Error;

/// Packet-level encoding and parsing errors.
///
/// # Examples
///
/// ```
/// use binrpc::BinRpcError;
///
/// assert_eq!(BinRpcError::MoreData.code(), -4);
/// assert_eq!(BinRpcError::Type.to_string(), "type mismatch");
/// ```
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BinRpcError {
    /// Invalid call parameters (for example a zero capacity buffer).
    #[error("invalid function call parameters")]
    Invalid,
    /// Appending would exceed the buffer capacity.
    #[error("buffer overflow")]
    Overflow,
    /// The packet header or framing is corrupt.
    #[error("corrupted packet")]
    BadPacket,
    /// More bytes are needed; repeat the operation once they arrive.
    #[error("more data needed")]
    MoreData,
    /// The end of the packet body was reached.
    #[error("end of packet reached")]
    EndOfPacket,
    /// The parse context was used before a header was parsed.
    #[error("parse context not initialised")]
    NotInitialised,
    /// Unknown record type, or the record does not match the requested type.
    #[error("type mismatch")]
    Type,
    /// A record is malformed or appears where it is not allowed.
    #[error("bad record")]
    Record,
    /// Internal inconsistency.
    #[error("internal error")]
    Bug,
    /// Allocation of request scoped state failed.
    #[error("out of memory")]
    OutOfMemory,
}

impl BinRpcError {
    /// Stable numeric code of this error (always negative).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Invalid => -1,
            Self::Overflow => -2,
            Self::BadPacket => -3,
            Self::MoreData => -4,
            Self::EndOfPacket => -5,
            Self::NotInitialised => -6,
            Self::Type => -7,
            Self::Record => -8,
            Self::Bug => -9,
            Self::OutOfMemory => -10,
        }
    }

    /// Returns true when the error only means the data ran out.
    ///
    /// Optional scan parameters treat these as "not supplied" rather than
    /// as a failure.
    #[must_use]
    pub const fn is_exhausted(self) -> bool { matches!(self, Self::MoreData | Self::EndOfPacket) }
}

/// Errors returned by a transport when writing a reply.
#[derive(Debug, Error)]
pub enum SendError {
    /// The write failed.
    #[error("send failed: {0}")]
    Failed(#[from] io::Error),
    /// The reply does not fit in a single datagram.
    #[error("datagram too big: {size} > {max}")]
    TooLarge {
        /// Size of the reply that was attempted.
        size: usize,
        /// Largest datagram the transport can emit.
        max: usize,
    },
}

impl SendError {
    /// Legacy numeric code: `-2` for oversized datagrams, `-1` otherwise.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Failed(_) => -1,
            Self::TooLarge { .. } => -2,
        }
    }
}

/// Errors surfaced to command handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// Encoding into a reply buffer failed.
    #[error("binrpc error: {0}")]
    Packet(#[from] BinRpcError),
    /// A reply or fault was already sent for this request.
    #[error("request already replied")]
    AlreadyReplied,
    /// The operation exists for interface completeness only.
    #[error("{0} not implemented")]
    Unsupported(&'static str),
    /// A formatted value did not fit in the per-request print buffer.
    #[error("buffer size exceeded ({limit})")]
    BufferExceeded {
        /// Configured print buffer size.
        limit: usize,
    },
    /// The handle does not refer to a node of the expected kind.
    #[error("handle does not refer to an open {expected}")]
    WrongNode {
        /// Kind of node the operation needs.
        expected: &'static str,
    },
    /// Transmitting the reply failed.
    #[error("transport error: {0}")]
    Send(#[from] SendError),
}

/// Result alias used by the handler facing API.
pub type Result<T, E = RpcError> = std::result::Result<T, E>;
