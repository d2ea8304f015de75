//! Request dispatch: framing checks, method lookup, handler invocation and
//! the final reply.
//!
//! [`Engine::process_request`] is called with whatever bytes a connection
//! has buffered. It either reports how many more bytes are needed (consuming
//! nothing), or consumes exactly one packet and writes exactly one reply or
//! fault to the transport.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use log::{error, warn};

use crate::{
    builder::ReplyBody,
    config::EngineConfig,
    context::RequestContext,
    error::BinRpcError,
    fault::{BAD_REQUEST, INTERNAL_ERROR, format_phrase, send_fault},
    packet::{MIN_PACKET_SIZE, PacketType, RecordReader, RecordType, RecordValue, parse_header},
    registry::MethodRegistry,
    rpc::Rpc,
    transport::Transport,
};

/// What happened to the buffered bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The packet is incomplete; nothing was consumed.
    Incomplete,
    /// One packet was consumed and answered.
    Complete,
    /// The stream is not speaking the protocol; a fault was attempted and
    /// everything buffered was consumed.
    Rejected,
}

/// Result of one [`Engine::process_request`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Processed {
    /// Bytes to drop from the front of the buffer.
    pub consumed: usize,
    /// Bytes still missing before the packet is complete.
    pub needed: usize,
    /// Outcome.
    pub disposition: Disposition,
}

impl Processed {
    const fn incomplete(needed: usize) -> Self {
        Self {
            consumed: 0,
            needed,
            disposition: Disposition::Incomplete,
        }
    }

    const fn complete(consumed: usize) -> Self {
        Self {
            consumed,
            needed: 0,
            disposition: Disposition::Complete,
        }
    }

    const fn rejected(consumed: usize) -> Self {
        Self {
            consumed,
            needed: 0,
            disposition: Disposition::Rejected,
        }
    }
}

/// Dispatches requests to the handlers of a [`MethodRegistry`].
///
/// The engine holds no per-request state and can be shared by any number
/// of connections.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use binrpc::{
///     config::EngineConfig,
///     engine::{Disposition, Engine},
///     registry::RegistryBuilder,
///     transport::BufferTransport,
/// };
///
/// let engine = Engine::new(
///     Arc::new(RegistryBuilder::with_builtins().build()),
///     EngineConfig::default(),
/// );
/// let mut out = BufferTransport::new();
/// // a header announcing a 9 byte body, with only 2 body bytes present
/// let processed = engine.process_request(&[0xA1, 0x00, 0x09, 0x01, 0x91, 0x0a], &mut out);
/// assert_eq!(processed.disposition, Disposition::Incomplete);
/// assert_eq!((processed.consumed, processed.needed), (0, 7));
/// assert!(out.as_slice().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct Engine {
    registry: Arc<MethodRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine dispatching to `registry`.
    #[must_use]
    pub fn new(registry: Arc<MethodRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config: config.normalized(),
        }
    }

    /// The registry requests are dispatched to.
    #[must_use]
    pub fn registry(&self) -> &Arc<MethodRegistry> { &self.registry }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig { &self.config }

    /// Process the packet at the start of `buf`, writing the reply to
    /// `transport`.
    ///
    /// Partial input is reported as [`Disposition::Incomplete`] with the
    /// number of missing bytes; calling again with a longer prefix of the
    /// same data is always safe. A malformed header cannot be resynchronised,
    /// so it is answered with fault 400 and the whole buffer is consumed.
    /// A malformed body or unexpected packet type consumes just that packet.
    pub fn process_request(&self, buf: &[u8], transport: &mut dyn Transport) -> Processed {
        if buf.len() < MIN_PACKET_SIZE {
            return Processed::incomplete(MIN_PACKET_SIZE - buf.len());
        }
        let header = match parse_header(buf) {
            Ok(header) => header,
            Err(BinRpcError::MoreData) => {
                // the length bytes themselves are missing
                crate::metrics::inc_partial_reads();
                return Processed::incomplete(1);
            }
            Err(e) => {
                warn!("rejecting packet with bad header: {e}");
                self.reject(transport, 0, format_args!("bad request: {e}"));
                return Processed::rejected(buf.len());
            }
        };
        let packet_len = header.packet_len();
        if packet_len > buf.len() {
            crate::metrics::inc_partial_reads();
            return Processed::incomplete(packet_len - buf.len());
        }
        crate::metrics::inc_requests();
        if header.kind != PacketType::Request {
            self.reject(
                transport,
                header.cookie,
                format_args!("bad request: {}", BinRpcError::BadPacket),
            );
            return Processed::complete(packet_len);
        }
        let body = &buf[header.header_len..packet_len];
        self.dispatch(body, header.cookie, transport);
        Processed::complete(packet_len)
    }

    fn dispatch(&self, body: &[u8], cookie: u32, transport: &mut dyn Transport) {
        let mut params = RecordReader::new(body);
        let method = match params.read_record(RecordType::Str) {
            Ok(record) => match record.value {
                RecordValue::Str(raw) => raw,
                _ => &[][..],
            },
            Err(e) => {
                error!("bad rpc request method, binrpc error: {e} ({})", e.code());
                self.reject(
                    transport,
                    cookie,
                    format_args!("bad request method: {e}"),
                );
                return;
            }
        };
        let name = String::from_utf8_lossy(method);
        let Some(entry) = self.registry.lookup(&name) else {
            self.fault(
                transport,
                cookie,
                INTERNAL_ERROR,
                format_args!("command {name} not found"),
            );
            return;
        };
        let span = tracing::debug_span!("rpc", method = %name, cookie);
        let _guard = span.enter();

        let body = match ReplyBody::new(
            self.config.max_body_size,
            self.config.struct_max_body_size,
        ) {
            Ok(body) => body,
            Err(e) => {
                error!("cannot set up reply buffers for {name}: {e} ({})", e.code());
                self.fault(
                    transport,
                    cookie,
                    INTERNAL_ERROR,
                    format_args!("internal server error"),
                );
                return;
            }
        };
        let mut ctx = RequestContext::new(&self.config, &name, cookie, params, body, transport);
        let handler = Arc::clone(entry.handler());
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&mut ctx as &mut dyn Rpc)));
        if let Err(panic) = outcome {
            let panic_msg = crate::panic::format_panic(&*panic);
            error!("rpc handler panicked: method={name}, panic={panic_msg}");
            tracing::error!(panic = %panic_msg, method = %name, "rpc handler panicked");
            crate::metrics::inc_handler_panics();
            if !ctx.replied() {
                ctx.fault(INTERNAL_ERROR, format_args!("internal server error"));
            }
            return;
        }
        ctx.finish();
    }

    fn reject(&self, transport: &mut dyn Transport, cookie: u32, args: std::fmt::Arguments<'_>) {
        self.fault(transport, cookie, BAD_REQUEST, args);
    }

    fn fault(
        &self,
        transport: &mut dyn Transport,
        cookie: u32,
        code: i32,
        args: std::fmt::Arguments<'_>,
    ) {
        let phrase = format_phrase(self.config.max_fault_len, args);
        match send_fault(transport, cookie, code, &phrase) {
            Ok(()) => crate::metrics::inc_faults(code),
            Err(e) => {
                error!("fault send failed: {e}");
                crate::metrics::inc_send_errors();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{registry::RegistryBuilder, transport::BufferTransport};

    fn request(method: &str, cookie: u32) -> Vec<u8> {
        let body = crate::client::encode_request_body(method, &[], 256).expect("body");
        let mut packet = crate::packet::build_header(PacketType::Request, body.len(), cookie)
            .expect("header")
            .to_vec();
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    #[traced_test]
    fn handler_panics_are_traced_with_their_message() {
        let registry = RegistryBuilder::new()
            .register("crash", &[], |_| panic!("index out of range"))
            .expect("register")
            .build();
        let engine = Engine::new(Arc::new(registry), EngineConfig::default());
        let mut out = BufferTransport::new();
        let processed = engine.process_request(&request("crash", 3), &mut out);
        assert_eq!(processed.disposition, Disposition::Complete);
        assert!(!out.as_slice().is_empty());
        assert!(logs_contain("rpc handler panicked"));
        assert!(logs_contain("index out of range"));
    }

    #[test]
    #[traced_test]
    fn replies_are_traced_inside_the_request_span() {
        let engine = Engine::new(
            Arc::new(RegistryBuilder::with_builtins().build()),
            EngineConfig::default(),
        );
        engine.process_request(&request("system.listMethods", 11), &mut BufferTransport::new());
        assert!(logs_contain("reply sent"));
        assert!(logs_contain("method=system.listMethods"));
        assert!(logs_contain("cookie=11"));
    }

    #[test]
    fn rejected_headers_consume_everything_buffered() {
        let engine = Engine::new(Arc::new(MethodRegistry::default()), EngineConfig::default());
        let mut out = BufferTransport::new();
        let processed = engine.process_request(&[0xA1, 0x70, 0, 0, 1, 2, 3], &mut out);
        assert_eq!(processed, Processed::rejected(7));
        // the answer is a fault packet
        assert_eq!(out.as_slice()[1] >> 4, PacketType::Fault.as_u8());
    }

    #[test]
    fn unusable_reply_buffers_fault_before_the_handler_runs() {
        let registry = RegistryBuilder::new()
            .register("never", &[], |rpc| {
                let _ = rpc.add(&[crate::rpc::Arg::Int(1)]);
            })
            .expect("register")
            .build();
        // bypass normalisation so the nested buffer cannot hold a record
        let engine = Engine {
            registry: Arc::new(registry),
            config: EngineConfig {
                struct_max_body_size: 0,
                ..EngineConfig::default()
            },
        };
        let mut out = BufferTransport::new();
        let processed = engine.process_request(&request("never", 5), &mut out);
        assert_eq!(processed.disposition, Disposition::Complete);
        assert_eq!(out.as_slice()[1] >> 4, PacketType::Fault.as_u8());
        assert_eq!(out.as_slice()[3], 5);
        let replies = crate::value::decode_body(&out.as_slice()[4..]).expect("fault body");
        assert_eq!(replies[0], crate::value::Value::Int(500));
        assert_eq!(replies[1], crate::value::Value::str("internal server error"));
    }

    #[test]
    fn missing_length_bytes_need_one_more() {
        let engine = Engine::new(Arc::new(MethodRegistry::default()), EngineConfig::default());
        // a four byte length is announced but only two bytes follow
        let processed = engine.process_request(&[0xA1, 0x0c, 0, 0], &mut BufferTransport::new());
        assert_eq!(processed, Processed::incomplete(1));
    }
}
