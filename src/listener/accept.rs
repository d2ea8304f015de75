//! Accept loop for stream sockets.

use std::{io, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Shared, stream::serve_stream, table::PeerAddr};

/// Source of incoming stream connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(super) trait AcceptListener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self) -> io::Result<(Self::Stream, PeerAddr)>;
    fn local_addr(&self) -> io::Result<PeerAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, PeerAddr)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, PeerAddr::Inet(addr)))
    }

    fn local_addr(&self) -> io::Result<PeerAddr> {
        TcpListener::local_addr(self).map(PeerAddr::Inet)
    }
}

#[async_trait]
impl AcceptListener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&self) -> io::Result<(UnixStream, PeerAddr)> {
        let (stream, addr) = UnixListener::accept(self).await?;
        Ok((stream, PeerAddr::Unix(addr.as_pathname().map(Path::to_path_buf))))
    }

    fn local_addr(&self) -> io::Result<PeerAddr> {
        let addr = UnixListener::local_addr(self)?;
        Ok(PeerAddr::Unix(addr.as_pathname().map(Path::to_path_buf)))
    }
}

/// Accepts connections until `shutdown` is cancelled, spawning one tracked
/// task per connection. Accept failures back off exponentially.
pub(super) async fn accept_loop<L>(
    listener: Arc<L>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) where
    L: AcceptListener + 'static,
{
    let backoff = shared.config.backoff;
    debug_assert!(
        backoff.initial_delay <= backoff.max_delay,
        "BackoffConfig invariant violated: initial_delay > max_delay"
    );
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) =
        accept_iteration(&listener, &shared, &shutdown, &tracker, delay).await
    {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &Arc<L>,
    shared: &Arc<Shared>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    select! {
        biased;

        () = shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer)) => {
                let local = listener.local_addr().unwrap_or(PeerAddr::Unix(None));
                spawn_connection_task(stream, peer, local, shared, shutdown, tracker);
                shared.config.backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                shared.config.backoff.next_delay(delay)
            }
        }),
    }
}

/// Spawn a task serving one stream connection, logging and discarding any
/// panics. Connections beyond the configured maximum are closed at once.
fn spawn_connection_task<S>(
    stream: S,
    peer: PeerAddr,
    local: PeerAddr,
    shared: &Arc<Shared>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let open = shared.table.len();
    let max = shared.config.max_connections;
    if open >= max {
        error!("maximum number of connections exceeded: {open} >= {max}, closing {peer}");
        return;
    }
    let guard = shared.table.open(peer.clone(), local);
    let shared = Arc::clone(shared);
    let shutdown = shutdown.clone();
    tracker.spawn(async move {
        let id = guard.id();
        log::debug!("new connection {id} from {peer} ({} open)", shared.table.len());
        let fut = std::panic::AssertUnwindSafe(serve_stream(
            stream,
            &shared.engine,
            &shared.config,
            &shutdown,
        ))
        .catch_unwind();

        match fut.await {
            Ok(Ok(())) => log::debug!("connection {id} from {peer} closed"),
            Ok(Err(e)) => error!("closing connection {id} from {peer}: {e}"),
            Err(panic) => {
                let panic_msg = crate::panic::format_panic(&*panic);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("connection task panicked: panic={panic_msg}, peer_addr={peer}");
                tracing::error!(panic = %panic_msg, peer_addr = %peer, "connection task panicked");
            }
        }
        drop(guard);
    });
}
