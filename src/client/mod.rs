//! Client side of the protocol.
//!
//! [`BinRpcClient`] sends one request at a time over a stream socket and
//! waits for the matching reply; [`DatagramClient`] does the same over UDP.
//! Both return a decoded [`Reply`].

mod codec;
mod error;

use std::{
    net::SocketAddr,
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
};

use bytes::Bytes;
pub use codec::{BinRpcCodec, DEFAULT_MAX_PACKET, Frame};
pub use error::ClientError;
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs, UdpSocket, UnixStream},
};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{
    error::BinRpcError,
    packet::{PacketBuf, PacketType},
    value::{Value, decode_body},
};

/// Decoded answer to a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Successful reply with its top level values.
    Values(Vec<Value>),
    /// Fault reply.
    Fault {
        /// Fault code, such as 400 or 500.
        code: i32,
        /// Fault phrase.
        phrase: String,
    },
}

impl Reply {
    /// Decode the body of a reply or fault packet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedPacket`] for request packets,
    /// [`ClientError::MalformedFault`] for faults without a code and a phrase,
    /// and [`ClientError::Packet`] for undecodable bodies.
    pub fn from_frame(frame: &Frame) -> Result<Self, ClientError> {
        let values = decode_body(&frame.body)?;
        match frame.kind {
            PacketType::Reply => Ok(Self::Values(values)),
            PacketType::Fault => match values.as_slice() {
                [Value::Int(code), Value::Str(phrase)] => Ok(Self::Fault {
                    code: i32::try_from(*code).map_err(|_| ClientError::MalformedFault)?,
                    phrase: String::from_utf8_lossy(phrase).into_owned(),
                }),
                _ => Err(ClientError::MalformedFault),
            },
            PacketType::Request => Err(ClientError::UnexpectedPacket(frame.kind)),
        }
    }

    /// Values of a successful reply.
    #[must_use]
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Self::Values(values) => Some(values),
            Self::Fault { .. } => None,
        }
    }

    /// Returns true for fault replies.
    #[must_use]
    pub const fn is_fault(&self) -> bool { matches!(self, Self::Fault { .. }) }
}

/// Encode the body of a request calling `method` with `params`.
///
/// # Errors
///
/// Returns [`BinRpcError::Overflow`] if the body exceeds `max_body` bytes
/// and [`BinRpcError::Invalid`] for unnamed structure members.
///
/// # Examples
///
/// ```
/// use binrpc::{client::encode_request_body, value::Value};
///
/// let body = encode_request_body("core.echo", &[Value::Int(1)], 64).expect("fits");
/// assert_eq!(&body[..], b"\x91\x0acore.echo\0\x10\x01");
/// ```
pub fn encode_request_body(
    method: &str,
    params: &[Value],
    max_body: usize,
) -> Result<Bytes, BinRpcError> {
    let mut pkt = PacketBuf::with_capacity(max_body)?;
    pkt.add_str(method.as_bytes())?;
    for param in params {
        param.encode(&mut pkt)?;
    }
    Ok(pkt.freeze())
}

/// Cookies start at a fixed seed and increase per request.
#[derive(Debug)]
struct CookieJar(AtomicU32);

impl CookieJar {
    const fn new() -> Self { Self(AtomicU32::new(1)) }

    fn next(&self) -> u32 { self.0.fetch_add(1, Ordering::Relaxed) }
}

/// Stream client issuing one request at a time.
///
/// # Examples
///
/// ```no_run
/// use binrpc::{client::BinRpcClient, value::Value};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), binrpc::client::ClientError> {
/// let mut client = BinRpcClient::connect_tcp("127.0.0.1:2049").await?;
/// let reply = client.call("core.echo", &[Value::str("hi")]).await?;
/// println!("{reply:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BinRpcClient<T> {
    framed: Framed<T, BinRpcCodec>,
    cookies: CookieJar,
}

impl BinRpcClient<TcpStream> {
    /// Connect to a TCP endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the connection fails.
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

impl BinRpcClient<UnixStream> {
    /// Connect to a Unix stream socket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the connection fails.
    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Ok(Self::new(UnixStream::connect(path).await?))
    }
}

impl<T> BinRpcClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Client over an established stream.
    pub fn new(io: T) -> Self { Self::with_codec(io, BinRpcCodec::default()) }

    /// Client over an established stream with a custom packet limit.
    pub fn with_codec(io: T, codec: BinRpcCodec) -> Self {
        Self {
            framed: Framed::new(io, codec),
            cookies: CookieJar::new(),
        }
    }

    /// Call `method` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request cannot be encoded or sent, the
    /// connection closes first, or the reply does not match the request.
    pub async fn call(&mut self, method: &str, params: &[Value]) -> Result<Reply, ClientError> {
        let cookie = self.cookies.next();
        let body = encode_request_body(method, params, self.framed.codec().max_packet())?;
        self.framed
            .send(Frame {
                kind: PacketType::Request,
                cookie,
                body,
            })
            .await?;
        let frame = self.framed.next().await.ok_or(ClientError::Disconnected)??;
        debug!("reply to {method}: cookie={cookie}, {} body bytes", frame.body.len());
        check_cookie(cookie, frame.cookie)?;
        Reply::from_frame(&frame)
    }

    /// Consume the client, returning the underlying stream.
    pub fn into_inner(self) -> T { self.framed.into_inner() }
}

/// Datagram client bound to an ephemeral local port.
#[derive(Debug)]
pub struct DatagramClient {
    socket: UdpSocket,
    peer: SocketAddr,
    codec: BinRpcCodec,
    cookies: CookieJar,
}

impl DatagramClient {
    /// Client sending datagrams to `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if no local socket can be bound.
    pub async fn connect(peer: SocketAddr) -> Result<Self, ClientError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0_u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self {
            socket,
            peer,
            codec: BinRpcCodec::new(usize::from(u16::MAX)),
            cookies: CookieJar::new(),
        })
    }

    /// Call `method` and wait for its reply datagram.
    ///
    /// # Errors
    ///
    /// As for [`BinRpcClient::call`]; a truncated reply datagram is a
    /// [`ClientError::Packet`].
    pub async fn call(&mut self, method: &str, params: &[Value]) -> Result<Reply, ClientError> {
        let cookie = self.cookies.next();
        let body = encode_request_body(method, params, self.codec.max_packet())?;
        let mut out = bytes::BytesMut::new();
        self.codec.encode(
            Frame {
                kind: PacketType::Request,
                cookie,
                body,
            },
            &mut out,
        )?;
        self.socket.send(&out).await?;

        let mut buf = vec![0; self.codec.max_packet()];
        let len = self.socket.recv(&mut buf).await?;
        let mut received = bytes::BytesMut::from(&buf[..len]);
        let frame = self
            .codec
            .decode(&mut received)?
            .ok_or(ClientError::Packet(BinRpcError::MoreData))?;
        debug!("datagram reply from {}: cookie={cookie}", self.peer);
        check_cookie(cookie, frame.cookie)?;
        Reply::from_frame(&frame)
    }
}

fn check_cookie(expected: u32, got: u32) -> Result<(), ClientError> {
    if expected == got {
        Ok(())
    } else {
        Err(ClientError::CookieMismatch { expected, got })
    }
}
