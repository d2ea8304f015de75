//! Owned BinRPC values and the coercion rules used by parameter scanning.
//!
//! [`Value`] is the fully decoded form of a body: clients use it to build
//! requests and to inspect replies, and tests use [`decode_body`] as the
//! reference decoder for what the engine puts on the wire.

use std::fmt;

use bytes::Bytes;

use crate::{
    error::BinRpcError,
    packet::{PacketBuf, RecordReader, RecordType, RecordValue},
};

/// A decoded wire value.
///
/// Structure members always carry a non-empty name; array elements never do.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// String (without terminating NUL).
    Str(Bytes),
    /// Raw bytes.
    Bytes(Bytes),
    /// Double, carried on the wire with three decimals.
    Double(f64),
    /// Ordered named members.
    Struct(Vec<(String, Value)>),
    /// Ordered unnamed elements.
    Array(Vec<Value>),
}

impl Value {
    /// Convenience constructor for string values.
    #[must_use]
    pub fn str(text: &str) -> Self { Self::Str(Bytes::copy_from_slice(text.as_bytes())) }

    /// Wire type of this value.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Int(_) => RecordType::Int,
            Self::Str(_) => RecordType::Str,
            Self::Bytes(_) => RecordType::Bytes,
            Self::Double(_) => RecordType::Double,
            Self::Struct(_) => RecordType::Struct,
            Self::Array(_) => RecordType::Array,
        }
    }

    /// Integer payload, if this is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload as UTF-8, if this is a valid UTF-8 string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => std::str::from_utf8(v).ok(),
            _ => None,
        }
    }

    /// Look up a structure member by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Append this value to `pkt`, recursing into structures and arrays.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the buffer fills up and
    /// [`BinRpcError::Invalid`] for a structure member with an empty name.
    pub fn encode(&self, pkt: &mut PacketBuf) -> Result<(), BinRpcError> {
        match self {
            Self::Int(v) => pkt.add_int(*v),
            Self::Str(v) => pkt.add_str(v),
            Self::Bytes(v) => pkt.add_bytes(v),
            Self::Double(v) => pkt.add_double(*v),
            Self::Struct(members) => {
                pkt.start_struct()?;
                for (name, value) in members {
                    if name.is_empty() {
                        return Err(BinRpcError::Invalid);
                    }
                    pkt.add_avp_name(name.as_bytes())?;
                    value.encode(pkt)?;
                }
                pkt.end_struct()
            }
            Self::Array(items) => {
                pkt.start_array()?;
                for item in items {
                    item.encode(pkt)?;
                }
                pkt.end_array()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) | Self::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
            Self::Double(v) => write!(f, "{v}"),
            Self::Struct(members) => {
                f.write_str("{")?;
                for (idx, (name, value)) in members.iter().enumerate() {
                    let sep = if idx == 0 { " " } else { ", " };
                    write!(f, "{sep}{name}: {value}")?;
                }
                f.write_str(" }")
            }
            Self::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

enum Frame {
    Struct(Vec<(String, Value)>, Option<String>),
    Array(Vec<Value>, Option<String>),
}

/// Decode every record of a complete body into values.
///
/// # Errors
///
/// Propagates reader errors; an unterminated structure or array yields
/// [`BinRpcError::MoreData`].
///
/// # Examples
///
/// ```
/// use binrpc::value::{Value, decode_body};
///
/// let body = [0x10, 0x03, 0x04, 0x10, 0x01, 0x84];
/// let values = decode_body(&body).expect("valid body");
/// assert_eq!(values, vec![Value::Int(3), Value::Array(vec![Value::Int(1)])]);
/// ```
pub fn decode_body(body: &[u8]) -> Result<Vec<Value>, BinRpcError> {
    let mut reader = RecordReader::new(body);
    let mut top = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    while !reader.is_exhausted() {
        let record = reader.read_record(RecordType::Any)?;
        let name = record.name.map(|n| String::from_utf8_lossy(n).into_owned());
        let finished = match record.value {
            RecordValue::StructStart => {
                stack.push(Frame::Struct(Vec::new(), name));
                continue;
            }
            RecordValue::ArrayStart => {
                stack.push(Frame::Array(Vec::new(), name));
                continue;
            }
            RecordValue::StructEnd | RecordValue::ArrayEnd => match stack.pop() {
                Some(Frame::Struct(members, name)) => (name, Value::Struct(members)),
                Some(Frame::Array(items, name)) => (name, Value::Array(items)),
                None => return Err(BinRpcError::Record),
            },
            RecordValue::Int(v) => (name, Value::Int(v)),
            RecordValue::Double(v) => (name, Value::Double(v)),
            RecordValue::Str(v) => (name, Value::Str(Bytes::copy_from_slice(v))),
            RecordValue::Bytes(v) => (name, Value::Bytes(Bytes::copy_from_slice(v))),
        };
        match (stack.last_mut(), finished) {
            (Some(Frame::Struct(members, _)), (Some(name), value)) => members.push((name, value)),
            (Some(Frame::Array(items, _)), (_, value)) => items.push(value),
            (None, (_, value)) => top.push(value),
            (Some(Frame::Struct(..)), (None, _)) => return Err(BinRpcError::Record),
        }
    }
    if stack.is_empty() {
        Ok(top)
    } else {
        Err(BinRpcError::MoreData)
    }
}

/// Result of converting a record to a string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrConversion<'a> {
    /// The record already was a string.
    Borrowed(&'a [u8]),
    /// The string was produced by formatting another type.
    Formatted(Bytes),
}

/// Convert a record to an integer: integers pass through, doubles are
/// truncated and strings must be a clean signed integer literal.
///
/// # Errors
///
/// Returns [`BinRpcError::Type`] when no conversion applies.
///
/// # Examples
///
/// ```
/// use binrpc::{packet::RecordValue, value::convert_int};
///
/// assert_eq!(convert_int(&RecordValue::Str(b"42")), Ok(42));
/// assert!(convert_int(&RecordValue::Str(b"abc")).is_err());
/// ```
pub fn convert_int(value: &RecordValue<'_>) -> Result<i64, BinRpcError> {
    match value {
        RecordValue::Int(v) => Ok(*v),
        RecordValue::Double(v) => Ok(truncate_double(*v)),
        RecordValue::Str(v) => std::str::from_utf8(v)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or(BinRpcError::Type),
        _ => Err(BinRpcError::Type),
    }
}

/// Convert a record to a double: doubles pass through, integers widen and
/// strings are parsed from their longest numeric prefix.
///
/// # Errors
///
/// Returns [`BinRpcError::Type`] when no conversion applies or the string
/// has no numeric prefix.
pub fn convert_double(value: &RecordValue<'_>) -> Result<f64, BinRpcError> {
    match value {
        RecordValue::Double(v) => Ok(*v),
        RecordValue::Int(v) => Ok(widen_int(*v)),
        RecordValue::Str(v) => parse_float_prefix(v).ok_or(BinRpcError::Type),
        _ => Err(BinRpcError::Type),
    }
}

/// Convert a record to a string: strings pass through and integers are
/// formatted in decimal.
///
/// # Errors
///
/// Returns [`BinRpcError::Bug`] for doubles, which have no string form,
/// and [`BinRpcError::Type`] for everything else.
pub fn convert_str<'a>(value: &RecordValue<'a>) -> Result<StrConversion<'a>, BinRpcError> {
    match value {
        RecordValue::Str(v) => Ok(StrConversion::Borrowed(v)),
        RecordValue::Int(v) => Ok(StrConversion::Formatted(Bytes::from(v.to_string()))),
        RecordValue::Double(_) => Err(BinRpcError::Bug),
        _ => Err(BinRpcError::Type),
    }
}

#[expect(clippy::cast_possible_truncation, reason = "truncation is the coercion rule")]
fn truncate_double(value: f64) -> i64 { value as i64 }

#[expect(clippy::cast_precision_loss, reason = "widening is the coercion rule")]
fn widen_int(value: i64) -> f64 { value as f64 }

fn parse_float_prefix(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?.trim_start();
    let mut end = text.len();
    while end > 0 {
        if let Some(v) = text.get(..end).and_then(|prefix| prefix.parse::<f64>().ok()) {
            return Some(v);
        }
        end -= 1;
    }
    None
}
