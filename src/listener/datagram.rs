//! Request loop of a datagram socket.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{net::UdpSocket, select, time::sleep};
use tokio_util::sync::CancellationToken;

use super::Shared;
use crate::{engine::Disposition, transport::BufferTransport};

/// Answer datagrams on `socket` until `shutdown` is cancelled.
///
/// Every datagram must carry exactly one complete request. Replies larger
/// than the datagram limit are dropped by the transport and logged by the
/// engine.
pub(super) async fn serve_datagrams(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let backoff = shared.config.backoff;
    let mut buf = vec![0; shared.config.max_datagram_size];
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) = datagram_iteration(&socket, &shared, &shutdown, &mut buf, delay).await
    {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn datagram_iteration(
    socket: &UdpSocket,
    shared: &Shared,
    shutdown: &CancellationToken,
    buf: &mut [u8],
    delay: Duration,
) -> Option<Duration> {
    let (len, peer) = select! {
        biased;

        () = shutdown.cancelled() => return None,
        res = socket.recv_from(buf) => match res {
            Ok(received) => received,
            Err(e) => {
                let local_addr = socket.local_addr().ok();
                warn!("recvfrom error: error={e:?}, local_addr={local_addr:?}");
                sleep(delay).await;
                return Some(shared.config.backoff.next_delay(delay));
            }
        },
    };
    debug!("new packet from {peer}: {len} bytes");
    let mut out = BufferTransport::datagram(shared.config.max_datagram_size);
    let processed = shared.engine.process_request(&buf[..len], &mut out);
    if processed.disposition == Disposition::Incomplete {
        warn!(
            "truncated datagram from {peer}: {len} bytes, {} missing",
            processed.needed
        );
    }
    let reply = out.take();
    if !reply.is_empty()
        && let Err(e) = socket.send_to(&reply, peer).await
    {
        warn!("reply to {peer} failed: {e}");
        crate::metrics::inc_send_errors();
    }
    Some(shared.config.backoff.initial_delay)
}
