//! Tokio-based listener feeding BinRPC requests to an [`Engine`].
//!
//! `CtlServer` binds any mix of TCP, Unix stream and UDP sockets. Stream
//! sockets get one task per accepted connection with its own receive
//! buffer; datagram sockets answer each datagram on their own task. Every
//! task is tracked so shutdown waits for in-flight requests to finish.

mod accept;
mod config;
mod datagram;
pub mod error;
mod stream;
pub mod table;

use std::{
    fmt,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

pub use config::{BackoffConfig, ListenerConfig};
pub use error::{ConnectionError, ListenerError};
use futures::Future;
use log::{info, warn};
pub use table::{ConnectionId, ConnectionInfo, ConnectionTable, PeerAddr};
use tokio::{
    net::{TcpListener, UdpSocket, UnixListener},
    select,
    signal,
    sync::oneshot,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{config::EngineConfig, engine::Engine, registry::RegistryBuilder};

/// Address a [`CtlServer`] listens on.
///
/// Parsed from `tcp:HOST:PORT`, `udp:HOST:PORT` or `unix:PATH`. Without a
/// prefix, anything containing a `/` is a Unix socket path and everything
/// else a TCP address.
///
/// ```
/// use binrpc::listener::Endpoint;
///
/// let ep: Endpoint = "udp:127.0.0.1:2046".parse().expect("valid endpoint");
/// assert_eq!(ep, Endpoint::Udp("127.0.0.1:2046".into()));
/// let ep: Endpoint = "/run/binrpc.sock".parse().expect("valid endpoint");
/// assert_eq!(ep.to_string(), "unix:/run/binrpc.sock");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP stream socket.
    Tcp(String),
    /// UDP datagram socket.
    Udp(String),
    /// Unix stream socket.
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once(':').unwrap_or(("", s));
        let endpoint = match scheme {
            "tcp" => Self::Tcp(rest.to_owned()),
            "udp" => Self::Udp(rest.to_owned()),
            "unix" | "unixs" => Self::Unix(PathBuf::from(rest)),
            _ if s.contains('/') => Self::Unix(PathBuf::from(s)),
            _ => Self::Tcp(s.to_owned()),
        };
        match &endpoint {
            Self::Tcp(addr) | Self::Udp(addr) if addr.is_empty() => {
                Err(ListenerError::Endpoint(s.to_owned()))
            }
            Self::Unix(path) if path.as_os_str().is_empty() => {
                Err(ListenerError::Endpoint(s.to_owned()))
            }
            _ => Ok(endpoint),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
            Self::Udp(addr) => write!(f, "udp:{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// State shared by every task of a server.
struct Shared {
    engine: Arc<Engine>,
    table: ConnectionTable,
    config: ListenerConfig,
}

enum BoundSocket {
    Tcp(Arc<TcpListener>),
    Unix(Arc<UnixListener>, PathBuf),
    Udp(Arc<UdpSocket>),
}

impl BoundSocket {
    fn endpoint(&self) -> io::Result<Endpoint> {
        Ok(match self {
            Self::Tcp(listener) => Endpoint::Tcp(listener.local_addr()?.to_string()),
            Self::Unix(_, path) => Endpoint::Unix(path.clone()),
            Self::Udp(socket) => Endpoint::Udp(socket.local_addr()?.to_string()),
        })
    }
}

/// Listener serving BinRPC requests on one or more sockets.
///
/// # Examples
///
/// ```no_run
/// use binrpc::{config::EngineConfig, listener::CtlServer, registry::RegistryBuilder};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), binrpc::listener::ListenerError> {
/// let server = CtlServer::from_registry(RegistryBuilder::with_builtins(), EngineConfig::default())?
///     .bind(&"tcp:127.0.0.1:2049".parse()?)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct CtlServer {
    engine: Arc<Engine>,
    table: ConnectionTable,
    config: ListenerConfig,
    sockets: Vec<BoundSocket>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl fmt::Debug for CtlServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtlServer")
            .field("table", &self.table)
            .field("config", &self.config)
            .field("sockets", &self.sockets.len())
            .finish_non_exhaustive()
    }
}

impl CtlServer {
    /// Server dispatching to `engine`, tracking stream connections in `table`.
    #[must_use]
    pub fn new(engine: Arc<Engine>, table: ConnectionTable) -> Self {
        Self {
            engine,
            table,
            config: ListenerConfig::default(),
            sockets: Vec::new(),
            ready_tx: None,
        }
    }

    /// Build the engine from `builder` after adding the `ctl.*` methods that
    /// report on this server's connections.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Registry`] if `builder` already defines a
    /// `ctl.*` name.
    pub fn from_registry(
        builder: RegistryBuilder,
        config: EngineConfig,
    ) -> Result<Self, ListenerError> {
        let table = ConnectionTable::new();
        let registry = table.register_methods(builder)?.build();
        let engine = Engine::new(Arc::new(registry), config);
        Ok(Self::new(Arc::new(engine), table))
    }

    /// Replace the listener limits.
    #[must_use]
    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config.normalized();
        self
    }

    /// Notify `tx` once every socket task is running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Connections currently open on this server.
    #[must_use]
    pub const fn table(&self) -> &ConnectionTable { &self.table }

    /// Endpoints bound so far, with ephemeral ports resolved.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.sockets
            .iter()
            .filter_map(|socket| socket.endpoint().ok())
            .collect()
    }

    /// Local address of the first TCP socket, if any.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.sockets.iter().find_map(|socket| match socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            _ => None,
        })
    }

    /// Local address of the first UDP socket, if any.
    #[must_use]
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.sockets.iter().find_map(|socket| match socket {
            BoundSocket::Udp(socket) => socket.local_addr().ok(),
            _ => None,
        })
    }

    /// Bind `endpoint`. A stale Unix socket file is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if the socket cannot be bound.
    pub async fn bind(mut self, endpoint: &Endpoint) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        let socket = match endpoint {
            Endpoint::Tcp(addr) => {
                BoundSocket::Tcp(Arc::new(TcpListener::bind(addr.as_str()).await.map_err(bind_err)?))
            }
            Endpoint::Udp(addr) => {
                BoundSocket::Udp(Arc::new(UdpSocket::bind(addr.as_str()).await.map_err(bind_err)?))
            }
            Endpoint::Unix(path) => {
                remove_stale_socket(path)?;
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                BoundSocket::Unix(Arc::new(listener), path.clone())
            }
        };
        info!("listening on {endpoint}");
        self.sockets.push(socket);
        Ok(self)
    }

    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::NothingBound`] if no socket was bound.
    /// Socket failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run(self) -> Result<(), ListenerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves, then wait for
    /// open connections to finish their current request.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::NothingBound`] if no socket was bound.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ListenerError>
    where
        S: Future<Output = ()> + Send,
    {
        let Self {
            engine,
            table,
            config,
            sockets,
            ready_tx,
        } = self;
        if sockets.is_empty() {
            return Err(ListenerError::NothingBound);
        }
        let shared = Arc::new(Shared {
            engine,
            table,
            config,
        });
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut unix_paths = Vec::new();

        for socket in sockets {
            let token = shutdown_token.clone();
            let shared = Arc::clone(&shared);
            match socket {
                BoundSocket::Tcp(listener) => {
                    tracker.spawn(accept::accept_loop(listener, shared, token, tracker.clone()));
                }
                BoundSocket::Unix(listener, path) => {
                    unix_paths.push(path);
                    tracker.spawn(accept::accept_loop(listener, shared, token, tracker.clone()));
                }
                BoundSocket::Udp(socket) => {
                    tracker.spawn(datagram::serve_datagrams(socket, shared, token));
                }
            }
        }

        // Signal readiness after all socket tasks have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        for path in unix_paths {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("cannot remove socket {}: {e}", path.display());
            }
        }
        Ok(())
    }
}

fn remove_stale_socket(path: &Path) -> Result<(), ListenerError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            warn!("removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ListenerError::StaleSocket {
            path: path.to_owned(),
            source,
        }),
    }
}
