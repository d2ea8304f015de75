//! Bounded buffer for appending typed records.

use bytes::{BufMut, Bytes, BytesMut};

use super::{MIN_RECORD_SIZE, RecordType};
use crate::{
    byte_order::{write_minimal_u32, write_network_u64},
    error::BinRpcError,
};

/// Scale applied to doubles: they travel as fixed point integers.
pub const DOUBLE_SCALE: f64 = 1000.0;

/// A packet body under construction with a fixed capacity.
///
/// Every `add_*` call either appends a complete record or leaves the buffer
/// untouched and returns [`BinRpcError::Overflow`].
///
/// # Examples
///
/// ```
/// use binrpc::packet::PacketBuf;
///
/// let mut pkt = PacketBuf::with_capacity(16).expect("capacity is valid");
/// pkt.add_int(0x1234).expect("fits");
/// pkt.add_str(b"abc").expect("fits");
/// assert_eq!(pkt.as_slice(), &[0x20, 0x12, 0x34, 0x41, b'a', b'b', b'c', 0]);
/// ```
#[derive(Clone, Debug)]
pub struct PacketBuf {
    buf: BytesMut,
    capacity: usize,
}

impl PacketBuf {
    /// Create an empty buffer that never grows beyond `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if `capacity` cannot hold a single
    /// record.
    pub fn with_capacity(capacity: usize) -> Result<Self, BinRpcError> {
        if capacity < MIN_RECORD_SIZE {
            return Err(BinRpcError::Overflow);
        }
        Ok(Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        })
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Maximum number of bytes this buffer accepts.
    #[must_use]
    pub const fn capacity(&self) -> usize { self.capacity }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> usize { self.capacity - self.buf.len() }

    /// Written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Consume the buffer, returning the written bytes.
    #[must_use]
    pub fn freeze(self) -> Bytes { self.buf.freeze() }

    /// Drop everything written after `len` bytes.
    ///
    /// Used to roll back a partially appended composite record.
    pub fn truncate(&mut self, len: usize) { self.buf.truncate(len); }

    fn ensure(&self, needed: usize) -> Result<(), BinRpcError> {
        if needed > self.remaining() {
            Err(BinRpcError::Overflow)
        } else {
            Ok(())
        }
    }

    /// Append an integer record.
    ///
    /// Values that fit in 32 bits use the minimal number of bytes of their
    /// two's complement form, as peers expect. Wider values use the
    /// extended length form with an eight byte body.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the record does not fit.
    pub fn add_int(&mut self, value: i64) -> Result<(), BinRpcError> {
        self.add_int_type(value, RecordType::Int)
    }

    /// Append a double record (fixed point, three decimals).
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the record does not fit.
    pub fn add_double(&mut self, value: f64) -> Result<(), BinRpcError> {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "fixed point encoding truncates like the C peers do"
        )]
        let fixed = (value * DOUBLE_SCALE) as i64;
        self.add_int_type(fixed, RecordType::Double)
    }

    fn add_int_type(&mut self, value: i64, kind: RecordType) -> Result<(), BinRpcError> {
        if let Ok(narrow) = i32::try_from(value) {
            #[expect(clippy::cast_sign_loss, reason = "two's complement view is intended")]
            let (bytes, len) = write_minimal_u32(narrow as u32);
            self.ensure(1 + len)?;
            self.buf.put_u8(tag(len, kind));
            self.buf.put_slice(&bytes[4 - len..]);
        } else {
            #[expect(clippy::cast_sign_loss, reason = "two's complement view is intended")]
            let bytes = write_network_u64(value as u64);
            self.ensure(2 + bytes.len())?;
            self.buf.put_u8(tag(8 | 1, kind));
            self.buf.put_u8(8);
            self.buf.put_slice(&bytes);
        }
        Ok(())
    }

    /// Append a NUL terminated string record.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the record does not fit.
    pub fn add_str(&mut self, value: &[u8]) -> Result<(), BinRpcError> {
        self.add_str_type(value, RecordType::Str)
    }

    /// Append a raw bytes record.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the record does not fit.
    pub fn add_bytes(&mut self, value: &[u8]) -> Result<(), BinRpcError> {
        self.add_str_type(value, RecordType::Bytes)
    }

    /// Append a structure member name.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the record does not fit.
    pub fn add_avp_name(&mut self, name: &[u8]) -> Result<(), BinRpcError> {
        self.add_str_type(name, RecordType::Avp)
    }

    fn add_str_type(&mut self, value: &[u8], kind: RecordType) -> Result<(), BinRpcError> {
        let nul = usize::from(matches!(kind, RecordType::Str | RecordType::Avp));
        let mark = self.len();
        self.add_str_mark(kind, value.len() + nul)?;
        if let Err(err) = self.ensure(value.len() + nul) {
            self.truncate(mark);
            return Err(err);
        }
        self.buf.put_slice(value);
        if nul == 1 {
            self.buf.put_u8(0);
        }
        Ok(())
    }

    /// Append only the tag and length of a string-like record of `len`
    /// bytes; the caller supplies the payload separately.
    ///
    /// For [`RecordType::Str`] and [`RecordType::Avp`] `len` must include
    /// the terminating NUL.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the tag does not fit, or
    /// [`BinRpcError::Invalid`] if `len` does not fit in 32 bits.
    pub fn add_str_mark(&mut self, kind: RecordType, len: usize) -> Result<(), BinRpcError> {
        if len < 8 {
            self.ensure(1)?;
            self.buf.put_u8(tag(len, kind));
            return Ok(());
        }
        let len = u32::try_from(len).map_err(|_| BinRpcError::Invalid)?;
        let (bytes, size) = write_minimal_u32(len);
        self.ensure(1 + size)?;
        self.buf.put_u8(tag(size | 8, kind));
        self.buf.put_slice(&bytes[4 - size..]);
        Ok(())
    }

    /// Append a structure start tag.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the tag does not fit.
    pub fn start_struct(&mut self) -> Result<(), BinRpcError> {
        self.add_tag(RecordType::Struct, false)
    }

    /// Append a structure end tag.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the tag does not fit.
    pub fn end_struct(&mut self) -> Result<(), BinRpcError> {
        self.add_tag(RecordType::Struct, true)
    }

    /// Append an array start tag.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the tag does not fit.
    pub fn start_array(&mut self) -> Result<(), BinRpcError> {
        self.add_tag(RecordType::Array, false)
    }

    /// Append an array end tag.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the tag does not fit.
    pub fn end_array(&mut self) -> Result<(), BinRpcError> { self.add_tag(RecordType::Array, true) }

    fn add_tag(&mut self, kind: RecordType, end: bool) -> Result<(), BinRpcError> {
        self.ensure(1)?;
        self.buf.put_u8(tag(if end { 8 } else { 0 }, kind));
        Ok(())
    }

    /// Append a fault body: integer code followed by the phrase string.
    ///
    /// Either both records are written or neither is.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if the records do not fit.
    pub fn add_fault(&mut self, code: i32, phrase: &[u8]) -> Result<(), BinRpcError> {
        let mark = self.len();
        self.add_int(i64::from(code))?;
        self.add_str(phrase).inspect_err(|_| self.truncate(mark))
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "callers only pass 4-bit size fields"
)]
const fn tag(size: usize, kind: RecordType) -> u8 { ((size as u8) << 4) | kind.as_u8() }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, &[0x00])]
    #[case(7, &[0x10, 0x07])]
    #[case(0x1234, &[0x20, 0x12, 0x34])]
    #[case(-1, &[0x40, 0xff, 0xff, 0xff, 0xff])]
    #[case(0x1_0000_0000, &[0x90, 0x08, 0, 0, 0, 1, 0, 0, 0, 0])]
    fn ints_use_minimal_encoding(#[case] value: i64, #[case] expected: &[u8]) {
        let mut pkt = PacketBuf::with_capacity(32).expect("buffer");
        pkt.add_int(value).expect("add int");
        assert_eq!(pkt.as_slice(), expected);
    }

    #[rstest]
    #[case(b"abcdef", &[0x71, b'a', b'b', b'c', b'd', b'e', b'f', 0])]
    #[case(b"", &[0x11, 0])]
    #[case(b"abcdefhij", &[0x91, 0x0a, b'a', b'b', b'c', b'd', b'e', b'f', b'h', b'i', b'j', 0])]
    fn strings_are_nul_terminated(#[case] value: &[u8], #[case] expected: &[u8]) {
        let mut pkt = PacketBuf::with_capacity(32).expect("buffer");
        pkt.add_str(value).expect("add str");
        assert_eq!(pkt.as_slice(), expected);
    }

    #[test]
    fn struct_tags_bracket_members() {
        let mut pkt = PacketBuf::with_capacity(32).expect("buffer");
        pkt.start_struct().expect("start");
        pkt.add_avp_name(b"s").expect("name");
        pkt.add_str(b"abc").expect("value");
        pkt.end_struct().expect("end");
        assert_eq!(
            pkt.as_slice(),
            &[0x03, 0x25, b's', 0, 0x41, b'a', b'b', b'c', 0, 0x83]
        );
    }

    #[test]
    fn overflow_leaves_buffer_untouched() {
        let mut pkt = PacketBuf::with_capacity(4).expect("buffer");
        pkt.add_int(1).expect("fits");
        assert_eq!(pkt.add_str(b"too long"), Err(BinRpcError::Overflow));
        assert_eq!(pkt.as_slice(), &[0x10, 0x01]);
    }

    #[test]
    fn failed_fault_rolls_back_the_code() {
        let mut pkt = PacketBuf::with_capacity(4).expect("buffer");
        assert_eq!(pkt.add_fault(500, b"phrase"), Err(BinRpcError::Overflow));
        assert!(pkt.is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            PacketBuf::with_capacity(0).map(|_| ()),
            Err(BinRpcError::Overflow)
        );
    }

    #[test]
    fn doubles_are_fixed_point() {
        let mut pkt = PacketBuf::with_capacity(8).expect("buffer");
        pkt.add_double(1.5).expect("add double");
        assert_eq!(pkt.as_slice(), &[0x22, 0x05, 0xdc]);
    }
}
