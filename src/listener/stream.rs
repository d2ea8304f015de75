//! Request loop of one stream connection.

use log::{debug, error};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use super::{ListenerConfig, error::ConnectionError};
use crate::{
    engine::{Disposition, Engine},
    transport::BufferTransport,
};

/// Unprocessed input of a connection: `buf[..end]` was received and
/// `buf[..proc]` of it already answered.
struct ReceiveBuffer {
    buf: Vec<u8>,
    proc: usize,
    end: usize,
}

impl ReceiveBuffer {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            proc: 0,
            end: 0,
        }
    }

    fn free(&mut self) -> &mut [u8] { &mut self.buf[self.end..] }

    fn pending(&self) -> &[u8] { &self.buf[self.proc..self.end] }

    fn compact(&mut self) {
        if self.proc == 0 {
            return;
        }
        self.buf.copy_within(self.proc..self.end, 0);
        self.end -= self.proc;
        self.proc = 0;
    }
}

/// Serve requests on `stream` until the peer disconnects, the connection
/// idles out or `shutdown` is cancelled.
///
/// Replies are written in request order. Bytes that cannot start a packet
/// are answered with a fault and close the connection.
///
/// # Errors
///
/// Returns a [`ConnectionError`] describing why the server gave up on the
/// connection; a clean disconnect between packets is `Ok`.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub(super) async fn serve_stream<S>(
    mut stream: S,
    engine: &Engine,
    config: &ListenerConfig,
    shutdown: &CancellationToken,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut input = ReceiveBuffer::new(config.stream_buffer_size);
    let mut out = BufferTransport::new();
    let mut needed = 0;
    loop {
        if input.free().is_empty() {
            error!("buffer overrun: {} bytes pending", input.end);
            return Err(ConnectionError::BufferOverrun {
                limit: config.stream_buffer_size,
            });
        }
        let read = select! {
            biased;

            () = shutdown.cancelled() => return Ok(()),
            res = read_some(&mut stream, input.free(), config) => res?,
        };
        let Some(read) = read else {
            debug!("connection idle for {:?}, closing", config.idle_timeout);
            return Ok(());
        };
        if read == 0 {
            if input.pending().is_empty() {
                return Ok(());
            }
            return Err(ConnectionError::UnexpectedEof {
                pending: input.pending().len(),
            });
        }
        input.end += read;
        if read < needed {
            needed -= read;
            continue;
        }
        while !input.pending().is_empty() {
            let processed = engine.process_request(input.pending(), &mut out);
            input.proc += processed.consumed;
            let reply = out.take();
            if !reply.is_empty() {
                stream.write_all(&reply).await?;
            }
            match processed.disposition {
                Disposition::Complete => needed = 0,
                Disposition::Incomplete => {
                    needed = processed.needed;
                    break;
                }
                Disposition::Rejected => {
                    stream.flush().await?;
                    return Err(ConnectionError::Rejected);
                }
            }
        }
        stream.flush().await?;
        input.compact();
    }
}

/// Read into `buf`, giving up after the idle timeout (`Ok(None)`).
async fn read_some<S>(
    stream: &mut S,
    buf: &mut [u8],
    config: &ListenerConfig,
) -> std::io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match config.idle_timeout {
        Some(limit) => match timeout(limit, stream.read(buf)).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read(buf).await.map(Some),
    }
}
