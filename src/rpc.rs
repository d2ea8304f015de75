//! The interface command handlers use to read parameters and build replies.
//!
//! A handler receives a `&mut dyn Rpc` for the duration of one request. It
//! reads its parameters with [`Rpc::scan`], appends reply values with
//! [`Rpc::add`] and the structure helpers, and either sends the reply
//! explicitly or lets the engine send it when the handler returns.
//!
//! ```
//! use binrpc::rpc::{Arg, Rpc};
//!
//! fn add_numbers(rpc: &mut dyn Rpc) {
//!     let scan = rpc.scan("dd");
//!     if !scan.is_complete() {
//!         // the engine sends the recorded parameter fault
//!         return;
//!     }
//!     let (a, b) = (scan.int(0).unwrap_or(0), scan.int(1).unwrap_or(0));
//!     let _ = rpc.add(&[Arg::Int(a + b)]);
//! }
//! ```

use std::fmt;

use bytes::Bytes;

use crate::{
    builder::NodeHandle,
    error::{BinRpcError, Result, RpcError},
};

/// A reply value passed to [`Rpc::add`], [`Rpc::struct_add`] or
/// [`Rpc::array_add`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg<'a> {
    /// Integer.
    Int(i64),
    /// Double.
    Double(f64),
    /// String.
    Str(&'a [u8]),
    /// Missing string, sent as `<null string>`.
    NullStr,
    /// Raw bytes.
    Bytes(&'a [u8]),
    /// Open a nested structure; its handle is returned.
    Struct,
    /// Open a nested array; its handle is returned.
    Array,
}

/// Text sent in place of a missing string.
pub const NULL_STRING: &[u8] = b"<null string>";

impl<'a> Arg<'a> {
    /// Name of the value kind for log lines.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Double(_) => "float",
            Self::Str(_) | Self::NullStr => "string",
            Self::Bytes(_) => "bytes array",
            Self::Struct => "structure",
            Self::Array => "array",
        }
    }

    /// String argument from an optional string.
    #[must_use]
    pub fn opt_str(value: Option<&'a str>) -> Self {
        value.map_or(Self::NullStr, |s| Self::Str(s.as_bytes()))
    }
}

impl From<i64> for Arg<'_> {
    fn from(value: i64) -> Self { Self::Int(value) }
}

impl From<i32> for Arg<'_> {
    fn from(value: i32) -> Self { Self::Int(i64::from(value)) }
}

impl From<u32> for Arg<'_> {
    fn from(value: u32) -> Self { Self::Int(i64::from(value)) }
}

impl From<bool> for Arg<'_> {
    fn from(value: bool) -> Self { Self::Int(i64::from(value)) }
}

impl From<f64> for Arg<'_> {
    fn from(value: f64) -> Self { Self::Double(value) }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self { Self::Str(value.as_bytes()) }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(value: &'a [u8]) -> Self { Self::Str(value) }
}

impl<'a> From<&'a Bytes> for Arg<'a> {
    fn from(value: &'a Bytes) -> Self { Self::Str(value) }
}

/// A parameter read by [`Rpc::scan`].
#[derive(Clone, Debug, PartialEq)]
pub enum ScanValue {
    /// Integer parameter.
    Int(i64),
    /// Double parameter.
    Double(f64),
    /// String parameter.
    Str(Bytes),
}

/// Outcome of [`Rpc::scan`]: the values read and the signed count.
///
/// A successful scan reports the number of parameters read. A failed scan
/// reports the negated number of parameters read before the failure, so
/// `0` is ambiguous on its own; use [`Scan::is_complete`].
#[derive(Clone, Debug, PartialEq)]
pub struct Scan {
    values: Vec<ScanValue>,
    complete: bool,
}

impl Scan {
    /// Scan that ended without error.
    #[must_use]
    pub const fn complete(values: Vec<ScanValue>) -> Self {
        Self {
            values,
            complete: true,
        }
    }

    /// Scan that stopped at a failing parameter.
    #[must_use]
    pub const fn failed(values: Vec<ScanValue>) -> Self {
        Self {
            values,
            complete: false,
        }
    }

    /// Returns true if no error stopped the scan.
    #[must_use]
    pub const fn is_complete(&self) -> bool { self.complete }

    /// Number of parameters read, negated when the scan failed.
    #[must_use]
    pub fn count(&self) -> i64 {
        let read = i64::try_from(self.values.len()).unwrap_or(i64::MAX);
        if self.complete { read } else { -read }
    }

    /// Values read, in format order.
    #[must_use]
    pub fn values(&self) -> &[ScanValue] { &self.values }

    /// Consume the scan, returning the values.
    #[must_use]
    pub fn into_values(self) -> Vec<ScanValue> { self.values }

    /// Integer at `idx`, if present and an integer.
    #[must_use]
    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx) {
            Some(ScanValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Double at `idx`, if present and a double.
    #[must_use]
    pub fn double(&self, idx: usize) -> Option<f64> {
        match self.values.get(idx) {
            Some(ScanValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// String at `idx`, if present and a string.
    #[must_use]
    pub fn str(&self, idx: usize) -> Option<&Bytes> {
        match self.values.get(idx) {
            Some(ScanValue::Str(v)) => Some(v),
            _ => None,
        }
    }
}

/// Capabilities handed to a command handler.
///
/// Exactly one reply is sent per request: after [`send`](Rpc::send) or
/// [`fault`](Rpc::fault) succeeded, further attempts are logged and
/// refused.
pub trait Rpc {
    /// Send a fault reply immediately. The phrase is truncated to the
    /// configured fault length. Ignored (and logged) after a reply.
    fn fault(&mut self, code: i32, args: fmt::Arguments<'_>);

    /// Send the reply built so far.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::AlreadyReplied`](crate::error::RpcError::AlreadyReplied)
    /// after a reply and [`RpcError::Send`](crate::error::RpcError::Send) when
    /// the transport fails. Either way no further reply is attempted.
    fn send(&mut self) -> Result<()>;

    /// Append values to the top level of the reply. Returns one handle per
    /// [`Arg::Struct`] or [`Arg::Array`], in order.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Packet`](crate::error::RpcError::Packet) when the
    /// reply buffer is full; a 500 fault is sent in that case.
    fn add(&mut self, args: &[Arg<'_>]) -> Result<Vec<NodeHandle>>;

    /// Read request parameters as described by `fmt`; see
    /// [`format`](crate::format) for the format characters.
    ///
    /// A type mismatch records a pending fault instead of replying, so the
    /// handler can retry with other expectations.
    fn scan(&mut self, fmt: &str) -> Scan;

    /// Append a formatted string to the top level of the reply.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::BufferExceeded`](crate::error::RpcError::BufferExceeded)
    /// when the text is longer than the print buffer.
    fn rpl_printf(&mut self, args: fmt::Arguments<'_>) -> Result<()>;

    /// Append named members to the structure `node`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::WrongNode`](crate::error::RpcError::WrongNode) if
    /// `node` is not a structure of this reply, and
    /// [`RpcError::Packet`](crate::error::RpcError::Packet) when its buffer
    /// is full or a name is empty.
    fn struct_add(
        &mut self,
        node: NodeHandle,
        members: &[(&str, Arg<'_>)],
    ) -> Result<Vec<NodeHandle>>;

    /// Append elements to the array `node`.
    ///
    /// # Errors
    ///
    /// As for [`struct_add`](Rpc::struct_add), with arrays.
    fn array_add(&mut self, node: NodeHandle, items: &[Arg<'_>]) -> Result<Vec<NodeHandle>>;

    /// Append a formatted string member named `name` to the structure `node`.
    ///
    /// # Errors
    ///
    /// As for [`struct_add`](Rpc::struct_add) and
    /// [`rpl_printf`](Rpc::rpl_printf).
    fn struct_printf(
        &mut self,
        node: NodeHandle,
        name: &str,
        args: fmt::Arguments<'_>,
    ) -> Result<()>;

    /// Reading structure parameters is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`RpcError::Unsupported`](crate::error::RpcError::Unsupported).
    fn struct_scan(&mut self, node: NodeHandle, fmt: &str) -> Result<Scan>;

    /// Open a structure at the top level of the reply.
    ///
    /// # Errors
    ///
    /// As for [`add`](Rpc::add).
    fn add_struct(&mut self) -> Result<NodeHandle> { single_handle(self.add(&[Arg::Struct])?) }

    /// Open an array at the top level of the reply.
    ///
    /// # Errors
    ///
    /// As for [`add`](Rpc::add).
    fn add_array(&mut self) -> Result<NodeHandle> { single_handle(self.add(&[Arg::Array])?) }
}

fn single_handle(handles: Vec<NodeHandle>) -> Result<NodeHandle> {
    handles
        .into_iter()
        .next()
        .ok_or(RpcError::Packet(BinRpcError::Bug))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Scan::complete(vec![ScanValue::Int(1), ScanValue::Int(2)]), 2)]
    #[case(Scan::failed(vec![ScanValue::Int(1)]), -1)]
    #[case(Scan::failed(Vec::new()), 0)]
    fn count_carries_sign(#[case] scan: Scan, #[case] expected: i64) {
        assert_eq!(scan.count(), expected);
    }

    #[test]
    fn typed_accessors_check_the_variant() {
        let scan = Scan::complete(vec![
            ScanValue::Int(4),
            ScanValue::Str(Bytes::from_static(b"x")),
        ]);
        assert_eq!(scan.int(0), Some(4));
        assert_eq!(scan.int(1), None);
        assert_eq!(scan.str(1).map(|s| &s[..]), Some(&b"x"[..]));
        assert_eq!(scan.double(5), None);
    }

    #[test]
    fn missing_strings_become_null_markers() {
        assert_eq!(Arg::opt_str(None), Arg::NullStr);
        assert_eq!(Arg::opt_str(Some("a")), Arg::Str(b"a"));
    }
}
