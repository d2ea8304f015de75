//! Building request packets and decoding what the engine wrote back.

use binrpc::{
    client::{Frame, Reply, encode_request_body},
    packet::{PacketType, build_header, parse_header},
    value::Value,
};
use bytes::Bytes;

/// Builder for complete request packets.
///
/// ```
/// use binrpc_testing::RequestBuilder;
///
/// let packet = RequestBuilder::new("core.echo").cookie(2).str("hi").build();
/// assert_eq!(&packet[..4], &[0xA1, 0x00, 0x10, 0x02]);
/// ```
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    method: String,
    params: Vec<Value>,
    cookie: u32,
    kind: PacketType,
}

impl RequestBuilder {
    /// Request invoking `method`, cookie 1.
    #[must_use]
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_owned(),
            params: Vec::new(),
            cookie: 1,
            kind: PacketType::Request,
        }
    }

    /// Set the cookie.
    #[must_use]
    pub fn cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    /// Announce a different packet type in the header.
    #[must_use]
    pub fn kind(mut self, kind: PacketType) -> Self {
        self.kind = kind;
        self
    }

    /// Append an integer parameter.
    #[must_use]
    pub fn int(self, value: i64) -> Self { self.value(Value::Int(value)) }

    /// Append a string parameter.
    #[must_use]
    pub fn str(self, value: &str) -> Self { self.value(Value::str(value)) }

    /// Append a double parameter.
    #[must_use]
    pub fn double(self, value: f64) -> Self { self.value(Value::Double(value)) }

    /// Append any parameter.
    #[must_use]
    pub fn value(mut self, value: Value) -> Self {
        self.params.push(value);
        self
    }

    /// Encoded body: method name followed by the parameters.
    ///
    /// # Panics
    ///
    /// Panics if the parameters cannot be encoded.
    #[must_use]
    pub fn body(&self) -> Bytes {
        encode_request_body(&self.method, &self.params, 1 << 20).expect("encodable request")
    }

    /// Complete packet.
    #[must_use]
    pub fn build(&self) -> Vec<u8> { packet(self.kind, self.cookie, &self.body()) }
}

/// Packet of `kind` wrapping an arbitrary `body`.
///
/// # Panics
///
/// Panics if the body length does not fit in a header.
#[must_use]
pub fn packet(kind: PacketType, cookie: u32, body: &[u8]) -> Vec<u8> {
    let header = build_header(kind, body.len(), cookie).expect("header fits");
    let mut out = header.to_vec();
    out.extend_from_slice(body);
    out
}

/// Decode every packet in `bytes`, returning cookie and reply of each.
///
/// # Panics
///
/// Panics if `bytes` is not a sequence of complete, well-formed packets.
#[must_use]
pub fn decode_replies(bytes: &[u8]) -> Vec<(u32, Reply)> {
    let mut rest = bytes;
    let mut out = Vec::new();
    while !rest.is_empty() {
        let header = parse_header(rest).expect("valid header");
        let (packet, tail) = rest.split_at(header.packet_len());
        let frame = Frame {
            kind: header.kind,
            cookie: header.cookie,
            body: Bytes::copy_from_slice(&packet[header.header_len..]),
        };
        out.push((header.cookie, Reply::from_frame(&frame).expect("decodable reply")));
        rest = tail;
    }
    out
}

/// Decode the single packet in `bytes`.
///
/// # Panics
///
/// Panics unless `bytes` holds exactly one well-formed packet.
#[must_use]
pub fn decode_reply(bytes: &[u8]) -> (u32, Reply) {
    let mut replies = decode_replies(bytes);
    assert_eq!(replies.len(), 1, "expected exactly one packet");
    replies.remove(0)
}
