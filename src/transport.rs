//! Outbound side of a connection as seen by the dispatch engine.
//!
//! The engine never owns a socket. Replies are handed to a [`Transport`] as
//! a list of borrowed chunks; a large reply may arrive in several calls, one
//! per scatter-gather write.

use std::io::{self, IoSlice, Write};

use bytes::{BufMut, BytesMut};

use crate::error::SendError;

/// Scatter-gather sink for reply packets.
///
/// Implementations return [`SendError::TooLarge`] when the reply cannot be
/// carried by the underlying medium (a datagram) and [`SendError::Failed`]
/// for any other failure.
pub trait Transport {
    /// Write every byte of `chunks`, in order.
    ///
    /// # Errors
    ///
    /// See the trait documentation.
    fn send_vectored(&mut self, chunks: &[IoSlice<'_>]) -> Result<(), SendError>;
}

impl<F> Transport for F
where
    F: FnMut(&[IoSlice<'_>]) -> Result<(), SendError>,
{
    fn send_vectored(&mut self, chunks: &[IoSlice<'_>]) -> Result<(), SendError> { self(chunks) }
}

/// Transport over any blocking [`Write`] implementation.
///
/// # Examples
///
/// ```
/// use std::io::IoSlice;
///
/// use binrpc::transport::{Transport, WriteTransport};
///
/// let mut transport = WriteTransport::new(Vec::new());
/// transport
///     .send_vectored(&[IoSlice::new(b"ab"), IoSlice::new(b"c")])
///     .expect("write to vec");
/// assert_eq!(transport.into_inner(), b"abc");
/// ```
#[derive(Debug)]
pub struct WriteTransport<W> {
    inner: W,
}

impl<W: Write> WriteTransport<W> {
    /// Wrap `inner`.
    pub const fn new(inner: W) -> Self { Self { inner } }

    /// Return the wrapped writer.
    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Transport for WriteTransport<W> {
    fn send_vectored(&mut self, chunks: &[IoSlice<'_>]) -> Result<(), SendError> {
        let mut owned: Vec<IoSlice<'_>> = chunks.to_vec();
        let mut slices = owned.as_mut_slice();
        while !slices.is_empty() {
            match self.inner.write_vectored(slices) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => IoSlice::advance_slices(&mut slices, n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.inner.flush()?;
        Ok(())
    }
}

/// Collects a reply into a single buffer, as needed for stream sockets
/// driven by an async runtime or for datagrams.
///
/// With a size limit the buffer models a datagram: a reply growing past the
/// limit is rejected with [`SendError::TooLarge`] and the partial contents
/// are discarded.
#[derive(Debug, Default)]
pub struct BufferTransport {
    buf: BytesMut,
    limit: Option<usize>,
}

impl BufferTransport {
    /// Unbounded buffer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Buffer for a datagram of at most `max` bytes.
    #[must_use]
    pub fn datagram(max: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit: Some(max),
        }
    }

    /// Bytes collected so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Take the collected bytes, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut { self.buf.split() }
}

impl Transport for BufferTransport {
    fn send_vectored(&mut self, chunks: &[IoSlice<'_>]) -> Result<(), SendError> {
        let incoming: usize = chunks.iter().map(|c| c.len()).sum();
        let size = self.buf.len() + incoming;
        if let Some(max) = self.limit
            && size > max
        {
            self.buf.clear();
            return Err(SendError::TooLarge { size, max });
        }
        self.buf.reserve(incoming);
        for chunk in chunks {
            self.buf.put_slice(chunk);
        }
        Ok(())
    }
}
