//! Errors raised while binding or running a listener.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::registry::DuplicateMethod;

/// Errors that may occur while setting up or running a [`CtlServer`](super::CtlServer).
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding a socket failed.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Endpoint that could not be bound.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A stale Unix socket could not be removed before binding.
    #[error("cannot remove stale socket {}: {source}", path.display())]
    StaleSocket {
        /// Socket path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An endpoint string was not understood.
    #[error("invalid endpoint {0:?}")]
    Endpoint(String),
    /// The server was asked to run without any socket.
    #[error("no endpoint bound")]
    NothingBound,
    /// A listener method collides with an application method.
    #[error(transparent)]
    Registry(#[from] DuplicateMethod),
}

/// Why a stream connection was closed by the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Reading or writing the socket failed.
    #[error("connection i/o failed: {0}")]
    Io(#[from] io::Error),
    /// A single packet did not fit the receive buffer.
    #[error("buffer overrun: packet does not fit {limit} bytes")]
    BufferOverrun {
        /// Receive buffer size.
        limit: usize,
    },
    /// The peer closed the connection in the middle of a packet.
    #[error("unexpected EOF with {pending} unprocessed bytes")]
    UnexpectedEof {
        /// Bytes received but never processed.
        pending: usize,
    },
    /// The peer sent bytes that are not a packet header.
    #[error("protocol violation")]
    Rejected,
}
