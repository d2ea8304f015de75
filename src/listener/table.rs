//! Table of open stream connections and the methods reporting on it.

use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use dashmap::DashMap;

use crate::{
    fault::BAD_REQUEST,
    registry::{DuplicateMethod, RegistryBuilder},
    rpc::{Arg, Rpc},
};

/// Identifier assigned to an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Address of one side of a stream connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerAddr {
    /// TCP endpoint.
    Inet(SocketAddr),
    /// Unix socket path; `None` for unnamed client sockets.
    Unix(Option<PathBuf>),
}

impl PeerAddr {
    /// Transport name shown by `ctl.who`.
    #[must_use]
    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Inet(_) => "tcp",
            Self::Unix(_) => "unix_stream",
        }
    }

    fn host_and_port(&self) -> (String, String) {
        match self {
            Self::Inet(addr) => (addr.ip().to_string(), addr.port().to_string()),
            Self::Unix(Some(path)) => (path.display().to_string(), String::new()),
            Self::Unix(None) => ("<anonymous unix socket>".to_owned(), String::new()),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Self::Unix(None) => f.write_str("unix:<anonymous>"),
        }
    }
}

/// What is known about an open connection.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Remote side.
    pub peer: PeerAddr,
    /// Local side.
    pub local: PeerAddr,
    /// When the connection was accepted.
    pub opened: Instant,
}

/// Concurrent table of open stream connections.
///
/// Cloning the table yields another handle to the same connections.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<TableInner>,
}

#[derive(Default)]
struct TableInner {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    next_id: AtomicU64,
}

impl fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("open", &self.len())
            .finish()
    }
}

impl ConnectionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record a new connection; it is removed when the guard drops.
    #[must_use]
    pub fn open(&self, peer: PeerAddr, local: PeerAddr) -> ConnectionGuard {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.connections.insert(
            id,
            ConnectionInfo {
                peer,
                local,
                opened: Instant::now(),
            },
        );
        crate::metrics::inc_connections();
        ConnectionGuard {
            table: self.clone(),
            id,
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.connections.len() }

    /// Returns true if no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.inner.connections.is_empty() }

    /// Open connections ordered by acceptance.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionInfo)> {
        let mut entries: Vec<_> = self
            .inner
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Add `ctl.connections` and `ctl.who`, both reporting on this table.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateMethod`] if the builder already has either name.
    pub fn register_methods(
        &self,
        builder: RegistryBuilder,
    ) -> Result<RegistryBuilder, DuplicateMethod> {
        let connections = self.clone();
        let who = self.clone();
        builder
            .register(
                "ctl.connections",
                &["Returns the number of open stream connections."],
                move |rpc| connections.report_count(rpc),
            )?
            .register(
                "ctl.who",
                &["List open stream connections."],
                move |rpc| who.report_connections(rpc),
            )
    }

    fn report_count(&self, rpc: &mut dyn Rpc) {
        let open = i64::try_from(self.len()).unwrap_or(i64::MAX);
        let _ = rpc.add(&[Arg::Int(open)]);
    }

    fn report_connections(&self, rpc: &mut dyn Rpc) {
        let entries = self.snapshot();
        if entries.is_empty() {
            rpc.fault(BAD_REQUEST, format_args!("no open stream connection"));
            return;
        }
        for (_, info) in entries {
            let (peer_host, peer_port) = info.peer.host_and_port();
            let (local_host, local_port) = info.local.host_and_port();
            let added = rpc.add(&[
                Arg::from("binrpc"),
                Arg::from(info.peer.transport()),
                Arg::from(peer_host.as_str()),
                Arg::from(peer_port.as_str()),
                Arg::from(local_host.as_str()),
                Arg::from(local_port.as_str()),
            ]);
            if added.is_err() {
                return;
            }
        }
    }
}

/// Removes its connection from the table when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    table: ConnectionTable,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Identifier of the guarded connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId { self.id }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.table.inner.connections.remove(&self.id);
        crate::metrics::dec_connections();
    }
}
