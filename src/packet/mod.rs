//! The BinRPC packet primitive.
//!
//! A packet is a small header followed by a body made of type tagged records:
//!
//! ```text
//!   byte 0        byte 1                  LL bytes     CL bytes
//! | MAGIC|VERS || TYPE|LL-1|CL-1 || total_len ... || cookie ... || body ...
//! ```
//!
//! Each record starts with a tag byte `S|size|type`. When `S` is clear the
//! 3-bit `size` is the value length; when it is set `size` bytes holding the
//! real length follow, and for structures and arrays the set bit marks the
//! closing tag instead.
//!
//! [`PacketBuf`] appends records into a bounded buffer, [`RecordReader`]
//! walks a received body, and [`header`] builds and parses packet headers.

pub mod buffer;
pub mod header;
pub mod reader;

pub use buffer::PacketBuf;
pub use header::{HeaderBytes, PacketHeader, build_header, parse_header};
pub use reader::{Record, RecordReader, RecordValue};

/// Protocol magic nibble.
pub const MAGIC: u8 = 0xA;
/// Protocol version nibble.
pub const VERSION: u8 = 1;
/// Bytes before the variable length fields of the header.
pub const FIXED_HEADER_SIZE: usize = 2;
/// Smallest complete header: fixed part plus one length and one cookie byte.
pub const MIN_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 2;
/// Largest possible header: four length and four cookie bytes.
pub const MAX_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 4 + 4;
/// Smallest buffer that can hold a packet.
pub const MIN_PACKET_SIZE: usize = MIN_HEADER_SIZE;
/// Smallest encoded record.
pub const MIN_RECORD_SIZE: usize = 1;

/// Kind of packet announced in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Method invocation.
    Request,
    /// Successful reply.
    Reply,
    /// Fault reply carrying a code and a phrase.
    Fault,
}

impl PacketType {
    /// Wire nibble for this packet type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Reply => 1,
            Self::Fault => 3,
        }
    }

    /// Decode a packet type nibble.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Request),
            1 => Some(Self::Reply),
            3 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// Record type nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Signed integer.
    Int,
    /// NUL terminated string.
    Str,
    /// Fixed point double (three decimals).
    Double,
    /// Structure start or end tag.
    Struct,
    /// Array start or end tag.
    Array,
    /// Structure member name.
    Avp,
    /// Raw bytes, not NUL terminated.
    Bytes,
    /// Wildcard used when reading: matches any record type.
    Any,
}

impl RecordType {
    /// Wire nibble for this record type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Int => 0,
            Self::Str => 1,
            Self::Double => 2,
            Self::Struct => 3,
            Self::Array => 4,
            Self::Avp => 5,
            Self::Bytes => 6,
            Self::Any => 0xf,
        }
    }

    /// Decode a record type nibble. The wildcard never appears on the wire.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Int),
            1 => Some(Self::Str),
            2 => Some(Self::Double),
            3 => Some(Self::Struct),
            4 => Some(Self::Array),
            5 => Some(Self::Avp),
            6 => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Human readable name used in fault phrases.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Str => "string",
            Self::Double => "float",
            Self::Struct => "structure",
            Self::Array => "array",
            Self::Avp => "structure member",
            Self::Bytes => "bytes array",
            Self::Any => "any",
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{PacketType, RecordType};

    #[rstest]
    #[case(PacketType::Request)]
    #[case(PacketType::Reply)]
    #[case(PacketType::Fault)]
    fn packet_type_nibbles_round_trip(#[case] kind: PacketType) {
        assert_eq!(PacketType::from_u8(kind.as_u8()), Some(kind));
    }

    #[test]
    fn unknown_nibbles_are_rejected() {
        assert_eq!(PacketType::from_u8(2), None);
        assert_eq!(RecordType::from_u8(7), None);
        assert_eq!(RecordType::from_u8(0xf), None);
    }
}
