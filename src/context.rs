//! Per-request state and the [`Rpc`] implementation handed to handlers.

use std::fmt::{self, Write as _};

use bytes::Bytes;
use log::{error, warn};

use crate::{
    builder::{ChunkWriter, NodeHandle, NodeKind, ReplyBody},
    config::EngineConfig,
    error::{BinRpcError, Result, RpcError, SendError},
    fault::{BAD_REQUEST, INTERNAL_ERROR, PendingFault, format_phrase, send_fault},
    format::{Directive, ScanFormat, ScanKind},
    gc::GcList,
    packet::{PacketBuf, PacketType, RecordReader, RecordType, build_header},
    rpc::{Arg, NULL_STRING, Rpc, Scan, ScanValue},
    transport::Transport,
    value::{StrConversion, convert_double, convert_int, convert_str},
};

/// State of one request, from the first parameter read to the reply.
///
/// The context borrows the request parameters from the receive buffer and
/// owns everything built for the reply. It is dropped as soon as the reply
/// was sent; values converted during scanning are released with it.
pub struct RequestContext<'a> {
    config: &'a EngineConfig,
    method: &'a str,
    cookie: u32,
    params: RecordReader<'a>,
    params_read: usize,
    body: ReplyBody,
    gc: GcList<Bytes>,
    pending: Option<PendingFault>,
    replied: bool,
    transport: &'a mut dyn Transport,
}

impl fmt::Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("cookie", &self.cookie)
            .field("params_read", &self.params_read)
            .field("body_len", &self.body.len())
            .field("pending", &self.pending)
            .field("replied", &self.replied)
            .finish_non_exhaustive()
    }
}

impl<'a> RequestContext<'a> {
    /// Create the context for `method`, reading parameters from `params`
    /// and building the reply into `body`.
    pub fn new(
        config: &'a EngineConfig,
        method: &'a str,
        cookie: u32,
        params: RecordReader<'a>,
        body: ReplyBody,
        transport: &'a mut dyn Transport,
    ) -> Self {
        Self {
            config,
            method,
            cookie,
            params,
            params_read: 0,
            body,
            gc: GcList::new(),
            pending: None,
            replied: false,
            transport,
        }
    }

    /// Method this request invokes.
    #[must_use]
    pub const fn method(&self) -> &str { self.method }

    /// Returns true once a reply or fault went out.
    #[must_use]
    pub const fn replied(&self) -> bool { self.replied }

    /// Fault recorded by the last failed scan, if any.
    #[must_use]
    pub const fn pending_fault(&self) -> Option<&PendingFault> { self.pending.as_ref() }

    /// Number of converted values kept alive until the request ends.
    #[must_use]
    pub fn temporaries(&self) -> usize { self.gc.len() }

    /// Send whatever reply the handler left behind.
    ///
    /// Nothing happens if the handler replied. Otherwise a recorded scan
    /// fault is sent when no top level value was added, and the reply body
    /// in every other case.
    pub fn finish(&mut self) {
        if self.replied {
            return;
        }
        match self.pending.take() {
            Some(pending) if self.body.root_len() == 0 => {
                self.send_fault_phrase(pending.code, &pending.phrase);
            }
            _ => {
                // failures are logged by send and leave nothing to do here
                let _ = self.send();
            }
        }
    }

    fn reply_twice(&self) {
        error!("rpc method {} tried to reply more than once", self.method);
    }

    fn send_fault_phrase(&mut self, code: i32, phrase: &[u8]) {
        if self.replied {
            self.reply_twice();
            return;
        }
        // a failed fault is as final as a delivered one
        self.replied = true;
        match send_fault(&mut *self.transport, self.cookie, code, phrase) {
            Ok(()) => {
                tracing::debug!(method = self.method, cookie = self.cookie, code, "fault sent");
                crate::metrics::inc_faults(code);
            }
            Err(e) => log_send_failure("fault", &e),
        }
    }

    fn prepare_fault(&mut self, code: i32, args: fmt::Arguments<'_>) {
        if self.replied {
            self.reply_twice();
            return;
        }
        self.pending = Some(PendingFault {
            code,
            phrase: format_phrase(self.config.max_fault_len, args),
        });
    }

    fn read_param(
        &mut self,
        directive: &Directive,
    ) -> Result<ScanValue, (BinRpcError, RecordType)> {
        let expected = directive.kind.record_type();
        let requested = if directive.autoconvert {
            RecordType::Any
        } else {
            expected
        };
        let record = self
            .params
            .read_record(requested)
            .map_err(|e| (e, expected))?;
        let converted = match directive.kind {
            ScanKind::Int => convert_int(&record.value).map(ScanValue::Int),
            ScanKind::Double => convert_double(&record.value).map(ScanValue::Double),
            ScanKind::Str => match convert_str(&record.value) {
                Ok(StrConversion::Borrowed(raw)) => {
                    Ok(ScanValue::Str(Bytes::copy_from_slice(raw)))
                }
                Ok(StrConversion::Formatted(text)) => {
                    Ok(ScanValue::Str(self.gc.track(text).clone()))
                }
                Err(e) => Err(e),
            },
            ScanKind::Struct => Err(BinRpcError::Bug),
        };
        converted.map_err(|e| (e, expected))
    }

    fn fill_buffer(
        &mut self,
        node: Option<NodeHandle>,
        args: &[Arg<'_>],
    ) -> Result<Vec<NodeHandle>> {
        let mut handles = Vec::new();
        for arg in args {
            match arg {
                Arg::Struct | Arg::Array => {
                    handles.push(self.body.open(node, None, container_kind(arg))?);
                }
                _ => put_scalar(self.buffer(node)?, arg)?,
            }
        }
        Ok(handles)
    }

    fn buffer(&mut self, node: Option<NodeHandle>) -> Result<&mut PacketBuf, BinRpcError> {
        match node {
            Some(handle) => self.body.node_mut(handle),
            None => Ok(self.body.root_mut()),
        }
    }

    fn expect_node(&self, node: NodeHandle, kind: NodeKind) -> Result<()> {
        if self.body.kind(node) == Some(kind) {
            Ok(())
        } else {
            Err(RpcError::WrongNode {
                expected: kind.name(),
            })
        }
    }

    fn printf(&self, args: fmt::Arguments<'_>) -> Result<String> {
        let limit = self.config.printf_buffer_size;
        let mut out = LimitedString {
            buf: String::new(),
            limit,
        };
        if out.write_fmt(args).is_err() {
            error!("print buffer size exceeded: limit={limit}, method={}", self.method);
            return Err(RpcError::BufferExceeded { limit });
        }
        Ok(out.buf)
    }
}

fn container_kind(arg: &Arg<'_>) -> NodeKind {
    if matches!(arg, Arg::Array) {
        NodeKind::Array
    } else {
        NodeKind::Struct
    }
}

fn put_scalar(buf: &mut PacketBuf, arg: &Arg<'_>) -> Result<(), BinRpcError> {
    match arg {
        Arg::Int(v) => buf.add_int(*v),
        Arg::Double(v) => buf.add_double(*v),
        Arg::Str(v) => buf.add_str(v),
        Arg::NullStr => buf.add_str(NULL_STRING),
        Arg::Bytes(v) => buf.add_bytes(v),
        Arg::Struct | Arg::Array => Err(BinRpcError::Bug),
    }
}

fn put_member(buf: &mut PacketBuf, name: &str, arg: &Arg<'_>) -> Result<(), BinRpcError> {
    let mark = buf.len();
    buf.add_avp_name(name.as_bytes())?;
    put_scalar(buf, arg).inspect_err(|_| buf.truncate(mark))
}

fn log_send_failure(what: &str, err: &SendError) {
    match err {
        SendError::TooLarge { .. } => error!("{what} send failed: datagram too big"),
        SendError::Failed(e) => error!("{what} send failed: {e}"),
    }
    crate::metrics::inc_send_errors();
}

/// `fmt::Write` sink that fails once `limit` bytes would be exceeded;
/// one byte stays reserved for the terminating NUL.
struct LimitedString {
    buf: String,
    limit: usize,
}

impl fmt::Write for LimitedString {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() >= self.limit {
            return Err(fmt::Error);
        }
        self.buf.push_str(s);
        Ok(())
    }
}

impl Rpc for RequestContext<'_> {
    fn fault(&mut self, code: i32, args: fmt::Arguments<'_>) {
        if self.replied {
            self.reply_twice();
            return;
        }
        let phrase = format_phrase(self.config.max_fault_len, args);
        self.send_fault_phrase(code, &phrase);
    }

    fn send(&mut self) -> Result<()> {
        if self.replied {
            self.reply_twice();
            return Err(RpcError::AlreadyReplied);
        }
        self.replied = true;
        let header = build_header(PacketType::Reply, self.body.len(), self.cookie)?;
        let mut writer = ChunkWriter::new(&mut *self.transport, self.config.max_msg_chunks);
        let result = writer
            .push(&header)
            .and_then(|()| self.body.write_chunks(&mut writer))
            .and_then(|()| writer.finish());
        match result {
            Ok(writes) => {
                tracing::debug!(
                    method = self.method,
                    cookie = self.cookie,
                    body_len = self.body.len(),
                    writes,
                    "reply sent"
                );
                Ok(())
            }
            Err(e) => {
                log_send_failure("reply", &e);
                Err(e.into())
            }
        }
    }

    fn add(&mut self, args: &[Arg<'_>]) -> Result<Vec<NodeHandle>> {
        let mut handles = Vec::new();
        for arg in args {
            let added = match arg {
                Arg::Struct | Arg::Array => self
                    .body
                    .open(None, None, container_kind(arg))
                    .map(|handle| handles.push(handle)),
                _ => put_scalar(self.body.root_mut(), arg),
            };
            if let Err(e) = added {
                self.fault(
                    INTERNAL_ERROR,
                    format_args!(
                        "Internal server error processing {}: {e} ({})",
                        arg.kind_name(),
                        e.code()
                    ),
                );
                return Err(e.into());
            }
        }
        Ok(handles)
    }

    fn scan(&mut self, fmt: &str) -> Scan {
        self.pending = None;
        let mut values = Vec::new();
        for item in ScanFormat::new(fmt, self.config.autoconvert) {
            let directive = match item {
                Ok(directive) => directive,
                Err(invalid) => {
                    self.fault(
                        INTERNAL_ERROR,
                        format_args!("internal server error, invalid format char '{}'", invalid.ch),
                    );
                    return Scan::failed(values);
                }
            };
            if directive.kind == ScanKind::Struct {
                self.fault(
                    INTERNAL_ERROR,
                    format_args!(
                        "internal server error, type {} not supported",
                        RecordType::Struct.as_u8()
                    ),
                );
                error!("scan format char '{}' not supported", directive.ch);
                return Scan::failed(values);
            }
            match self.read_param(&directive) {
                Ok(value) => {
                    values.push(value);
                    self.params_read += 1;
                }
                Err((err, _)) if directive.optional && err.is_exhausted() => {
                    return Scan::complete(values);
                }
                Err((err, kind)) => {
                    let index = self.params_read;
                    self.prepare_fault(
                        BAD_REQUEST,
                        format_args!(
                            "error at parameter {index}: expected {} type but {err}",
                            kind.name()
                        ),
                    );
                    return Scan::failed(values);
                }
            }
        }
        Scan::complete(values)
    }

    fn rpl_printf(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let text = self.printf(args)?;
        self.body
            .root_mut()
            .add_str(text.as_bytes())
            .inspect_err(|e| error!("rpl_printf: adding string failed: {e} ({})", e.code()))?;
        Ok(())
    }

    fn struct_add(
        &mut self,
        node: NodeHandle,
        members: &[(&str, Arg<'_>)],
    ) -> Result<Vec<NodeHandle>> {
        self.expect_node(node, NodeKind::Struct)?;
        let mut handles = Vec::new();
        for (name, arg) in members {
            if name.is_empty() {
                error!("struct_add: empty member name in {}", self.method);
                return Err(BinRpcError::Invalid.into());
            }
            let added = match arg {
                Arg::Struct | Arg::Array => self
                    .body
                    .open(Some(node), Some(name.as_bytes()), container_kind(arg))
                    .map(|handle| handles.push(handle)),
                _ => self
                    .body
                    .node_mut(node)
                    .and_then(|buf| put_member(buf, name, arg)),
            };
            if let Err(e) = added {
                error!("failed to add structure member {name} ({}): {e}", arg.kind_name());
                return Err(e.into());
            }
        }
        Ok(handles)
    }

    fn array_add(&mut self, node: NodeHandle, items: &[Arg<'_>]) -> Result<Vec<NodeHandle>> {
        self.expect_node(node, NodeKind::Array)?;
        self.fill_buffer(Some(node), items).inspect_err(|e| {
            error!("failed to add array element: {e}");
        })
    }

    fn struct_printf(
        &mut self,
        node: NodeHandle,
        name: &str,
        args: fmt::Arguments<'_>,
    ) -> Result<()> {
        self.expect_node(node, NodeKind::Struct)?;
        if name.is_empty() {
            return Err(BinRpcError::Invalid.into());
        }
        let text = self.printf(args)?;
        self.body
            .node_mut(node)
            .and_then(|buf| put_member(buf, name, &Arg::Str(text.as_bytes())))
            .inspect_err(|e| error!("struct_printf: adding member failed: {e} ({})", e.code()))?;
        Ok(())
    }

    fn struct_scan(&mut self, _node: NodeHandle, _fmt: &str) -> Result<Scan> {
        error!("struct_scan not implemented");
        Err(RpcError::Unsupported("struct_scan"))
    }
}

impl Drop for RequestContext<'_> {
    fn drop(&mut self) {
        if !self.replied {
            warn!("request context dropped without reply: method={}", self.method);
        }
    }
}
