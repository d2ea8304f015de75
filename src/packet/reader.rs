//! Cursor over the records of a received packet body.

use super::{RecordType, buffer::DOUBLE_SCALE};
use crate::{byte_order::read_network_uint, error::BinRpcError};

/// Value carried by one record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecordValue<'a> {
    /// Integer record.
    Int(i64),
    /// String record, without its terminating NUL.
    Str(&'a [u8]),
    /// Raw bytes record.
    Bytes(&'a [u8]),
    /// Fixed point double record.
    Double(f64),
    /// Opening tag of a structure.
    StructStart,
    /// Closing tag of a structure.
    StructEnd,
    /// Opening tag of an array.
    ArrayStart,
    /// Closing tag of an array.
    ArrayEnd,
}

impl RecordValue<'_> {
    /// Wire type of this value.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Int(_) => RecordType::Int,
            Self::Str(_) => RecordType::Str,
            Self::Bytes(_) => RecordType::Bytes,
            Self::Double(_) => RecordType::Double,
            Self::StructStart | Self::StructEnd => RecordType::Struct,
            Self::ArrayStart | Self::ArrayEnd => RecordType::Array,
        }
    }
}

/// A decoded record; structure members carry their name.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record<'a> {
    /// Member name for records read inside a structure.
    pub name: Option<&'a [u8]>,
    /// The record value.
    pub value: RecordValue<'a>,
}

/// Reads records sequentially from a complete packet body.
///
/// The reader tracks open structures and arrays so it can reject records
/// that are not allowed where they appear: structure bodies contain only
/// named members, and end tags must match the innermost open container.
/// A failed read leaves the cursor where it was.
///
/// # Examples
///
/// ```
/// use binrpc::packet::{RecordReader, RecordType, RecordValue};
///
/// let body = [0x10, 0x2a, 0x31, b'h', b'i', 0];
/// let mut reader = RecordReader::new(&body);
/// let first = reader.read_record(RecordType::Int).expect("int record");
/// assert_eq!(first.value, RecordValue::Int(42));
/// let second = reader.read_record(RecordType::Any).expect("string record");
/// assert_eq!(second.value, RecordValue::Str(b"hi"));
/// assert!(reader.is_exhausted());
/// ```
#[derive(Clone, Debug)]
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
    open: Vec<RecordType>,
}

struct RawRecord<'a> {
    kind: RecordType,
    end_tag: bool,
    payload: &'a [u8],
    next: usize,
}

impl<'a> RecordReader<'a> {
    /// Start reading at the beginning of `body`.
    #[must_use]
    pub const fn new(body: &'a [u8]) -> Self {
        Self {
            buf: body,
            pos: 0,
            open: Vec::new(),
        }
    }

    /// Offset of the next record within the body.
    #[must_use]
    pub const fn offset(&self) -> usize { self.pos }

    /// Returns true when every byte of the body was consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool { self.pos >= self.buf.len() }

    /// Number of structures and arrays currently open.
    #[must_use]
    pub fn depth(&self) -> usize { self.open.len() }

    /// Read the next record, requiring it to be of type `expected`
    /// ([`RecordType::Any`] accepts every type).
    ///
    /// # Errors
    ///
    /// - [`BinRpcError::EndOfPacket`] when the body is exhausted.
    /// - [`BinRpcError::MoreData`] when the record is truncated.
    /// - [`BinRpcError::Type`] when the type differs from `expected` or is unknown.
    /// - [`BinRpcError::Record`] when the record is not allowed at this position.
    pub fn read_record(&mut self, expected: RecordType) -> Result<Record<'a>, BinRpcError> {
        if self.is_exhausted() {
            return Err(BinRpcError::EndOfPacket);
        }
        let raw = self.read_raw(self.pos)?;
        if expected != RecordType::Any && expected != raw.kind {
            return Err(BinRpcError::Type);
        }
        let top = self.open.last().copied();
        if raw.kind == RecordType::Avp {
            if top != Some(RecordType::Struct) {
                return Err(BinRpcError::Type);
            }
            let name = strip_nul(raw.payload)?;
            let member = self.read_raw(raw.next)?;
            if member.kind == RecordType::Avp || (member.end_tag && is_container(member.kind)) {
                return Err(BinRpcError::Record);
            }
            let value = decode_value(&member)?;
            self.enter(value);
            self.pos = member.next;
            return Ok(Record {
                name: Some(name),
                value,
            });
        }
        if top == Some(RecordType::Struct) && !(raw.kind == RecordType::Struct && raw.end_tag) {
            return Err(BinRpcError::Record);
        }
        let value = decode_value(&raw)?;
        match value {
            RecordValue::StructEnd | RecordValue::ArrayEnd => {
                if top != Some(raw.kind) {
                    return Err(BinRpcError::Record);
                }
                self.open.pop();
            }
            _ => self.enter(value),
        }
        self.pos = raw.next;
        Ok(Record { name: None, value })
    }

    fn enter(&mut self, value: RecordValue<'_>) {
        match value {
            RecordValue::StructStart => self.open.push(RecordType::Struct),
            RecordValue::ArrayStart => self.open.push(RecordType::Array),
            _ => {}
        }
    }

    fn read_raw(&self, pos: usize) -> Result<RawRecord<'a>, BinRpcError> {
        let buf = self.buf;
        let tag = *buf.get(pos).ok_or(BinRpcError::MoreData)?;
        let kind = RecordType::from_u8(tag & 0xf).ok_or(BinRpcError::Type)?;
        let size = usize::from(tag >> 4);
        let mut p = pos + 1;
        let end_tag = size & 8 != 0;
        let len = if end_tag {
            let len_bytes = buf.get(p..p + (size & 7)).ok_or(BinRpcError::MoreData)?;
            p += len_bytes.len();
            usize::try_from(read_network_uint(len_bytes)).map_err(|_| BinRpcError::Record)?
        } else {
            size
        };
        let payload = buf.get(p..p + len).ok_or(BinRpcError::MoreData)?;
        Ok(RawRecord {
            kind,
            end_tag,
            payload,
            next: p + len,
        })
    }
}

const fn is_container(kind: RecordType) -> bool {
    matches!(kind, RecordType::Struct | RecordType::Array)
}

fn strip_nul(payload: &[u8]) -> Result<&[u8], BinRpcError> {
    match payload.split_last() {
        Some((_, text)) => Ok(text),
        None => Err(BinRpcError::Record),
    }
}

fn decode_int(payload: &[u8]) -> Result<i64, BinRpcError> {
    if payload.len() > 8 {
        return Err(BinRpcError::Record);
    }
    let raw = read_network_uint(payload);
    if payload.len() <= 4 {
        // short integers are the 32-bit two's complement form
        let narrow = u32::try_from(raw).map_err(|_| BinRpcError::Bug)?;
        Ok(i64::from(i32::from_ne_bytes(narrow.to_ne_bytes())))
    } else {
        Ok(i64::from_ne_bytes(raw.to_ne_bytes()))
    }
}

#[expect(clippy::cast_precision_loss, reason = "fixed point values are small")]
fn fixed_to_f64(fixed: i64) -> f64 { fixed as f64 / DOUBLE_SCALE }

fn decode_value<'a>(raw: &RawRecord<'a>) -> Result<RecordValue<'a>, BinRpcError> {
    Ok(match raw.kind {
        RecordType::Int => RecordValue::Int(decode_int(raw.payload)?),
        RecordType::Double => RecordValue::Double(fixed_to_f64(decode_int(raw.payload)?)),
        RecordType::Str => RecordValue::Str(strip_nul(raw.payload)?),
        RecordType::Bytes => RecordValue::Bytes(raw.payload),
        RecordType::Struct if raw.end_tag => RecordValue::StructEnd,
        RecordType::Struct => RecordValue::StructStart,
        RecordType::Array if raw.end_tag => RecordValue::ArrayEnd,
        RecordType::Array => RecordValue::ArrayStart,
        RecordType::Avp | RecordType::Any => return Err(BinRpcError::Record),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn reads_struct_members_with_names() {
        let body = [0x03, 0x75, b'i', b'n', b't', b'v', b'a', b'l', 0, 0x10, 0x03, 0x83];
        let mut reader = RecordReader::new(&body);
        assert_eq!(
            reader.read_record(RecordType::Any).expect("start").value,
            RecordValue::StructStart
        );
        let member = reader.read_record(RecordType::Any).expect("member");
        assert_eq!(member.name, Some(&b"intval"[..]));
        assert_eq!(member.value, RecordValue::Int(3));
        assert_eq!(
            reader.read_record(RecordType::Any).expect("end").value,
            RecordValue::StructEnd
        );
        assert!(reader.is_exhausted());
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn arrays_may_be_struct_members() {
        let body = [0x03, 0x25, b'a', 0, 0x04, 0x10, 0x01, 0x84, 0x83];
        let mut reader = RecordReader::new(&body);
        reader.read_record(RecordType::Any).expect("struct start");
        let member = reader.read_record(RecordType::Any).expect("array member");
        assert_eq!(member.value, RecordValue::ArrayStart);
        assert_eq!(reader.depth(), 2);
        assert_eq!(
            reader.read_record(RecordType::Any).expect("element").value,
            RecordValue::Int(1)
        );
        reader.read_record(RecordType::Any).expect("array end");
        reader.read_record(RecordType::Any).expect("struct end");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn type_mismatch_keeps_position() {
        let body = [0x10, 0x01];
        let mut reader = RecordReader::new(&body);
        assert_eq!(
            reader.read_record(RecordType::Str),
            Err(BinRpcError::Type)
        );
        assert_eq!(reader.offset(), 0);
    }

    #[rstest]
    #[case(&[0x20, 0x01], BinRpcError::MoreData)]
    #[case(&[0x91], BinRpcError::MoreData)]
    #[case(&[0x07], BinRpcError::Type)]
    #[case(&[0x83], BinRpcError::Record)]
    #[case(&[0x03, 0x10, 0x01], BinRpcError::Record)]
    fn malformed_records_are_reported(#[case] body: &[u8], #[case] expected: BinRpcError) {
        let mut reader = RecordReader::new(body);
        let mut result = reader.read_record(RecordType::Any).map(|_| ());
        if result.is_ok() {
            result = reader.read_record(RecordType::Any).map(|_| ());
        }
        assert_eq!(result, Err(expected));
    }

    #[test]
    fn exhausted_body_reports_end_of_packet() {
        let mut reader = RecordReader::new(&[]);
        assert_eq!(
            reader.read_record(RecordType::Any),
            Err(BinRpcError::EndOfPacket)
        );
    }

    #[rstest]
    #[case(&[0x40, 0xff, 0xff, 0xff, 0xfe], -2)]
    #[case(&[0x90, 0x08, 0, 0, 0, 1, 0, 0, 0, 0], 0x1_0000_0000)]
    fn integers_decode_signed(#[case] body: &[u8], #[case] expected: i64) {
        let mut reader = RecordReader::new(body);
        assert_eq!(
            reader.read_record(RecordType::Int).expect("int").value,
            RecordValue::Int(expected)
        );
    }
}
