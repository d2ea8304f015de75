//! Fault phrases and fault packets.

use std::{
    fmt::{self, Write as _},
    io::IoSlice,
};

use crate::{
    error::{BinRpcError, SendError},
    packet::{PacketBuf, PacketType, RecordType, build_header},
    transport::Transport,
};

/// Code sent for malformed requests.
pub const BAD_REQUEST: i32 = 400;
/// Code sent for unknown methods and internal failures.
pub const INTERNAL_ERROR: i32 = 500;

// integer record (tag + 4 bytes) plus a string mark for phrases up to 64 KiB
const FAULT_START_SIZE: usize = 5 + 3;

/// Format `args` into a phrase of at most `max_len` bytes including the
/// terminating NUL, which is always present.
///
/// Longer output is cut at the last character boundary that fits.
///
/// # Examples
///
/// ```
/// use binrpc::fault::format_phrase;
///
/// let phrase = format_phrase(8, format_args!("{}", "truncated"));
/// assert_eq!(phrase, b"truncat\0");
/// ```
#[must_use]
pub fn format_phrase(max_len: usize, args: fmt::Arguments<'_>) -> Vec<u8> {
    let mut out = Bounded {
        buf: String::new(),
        limit: max_len.saturating_sub(1),
        truncated: false,
    };
    // Bounded never fails; a Display impl that errors just ends the phrase.
    let _ = out.write_fmt(args);
    let mut phrase = out.buf.into_bytes();
    phrase.push(0);
    phrase
}

struct Bounded {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl fmt::Write for Bounded {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }
        let room = self.limit - self.buf.len();
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&s[..cut]);
        self.truncated = true;
        Ok(())
    }
}

/// A fault recorded by a failed scan, sent only if the handler finishes
/// without replying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingFault {
    /// Fault code.
    pub code: i32,
    /// NUL terminated phrase.
    pub phrase: Vec<u8>,
}

impl PendingFault {
    /// Phrase without its terminating NUL, lossily decoded.
    #[must_use]
    pub fn phrase_lossy(&self) -> String {
        let text = self.phrase.strip_suffix(&[0]).unwrap_or(&self.phrase);
        String::from_utf8_lossy(text).into_owned()
    }
}

/// Send a fault packet as three chunks: header, code plus string mark,
/// then the phrase.
///
/// `phrase` must already carry its terminating NUL.
///
/// # Errors
///
/// Returns [`SendError::Failed`] when the packet cannot be built and
/// propagates transport errors.
pub fn send_fault(
    transport: &mut dyn Transport,
    cookie: u32,
    code: i32,
    phrase: &[u8],
) -> Result<(), SendError> {
    let start = fault_start(code, phrase.len()).map_err(packet_failure)?;
    let header = build_header(PacketType::Fault, start.len() + phrase.len(), cookie)
        .map_err(packet_failure)?;
    transport.send_vectored(&[
        IoSlice::new(&header),
        IoSlice::new(start.as_slice()),
        IoSlice::new(phrase),
    ])
}

fn fault_start(code: i32, phrase_len: usize) -> Result<PacketBuf, BinRpcError> {
    let mut start = PacketBuf::with_capacity(FAULT_START_SIZE)?;
    start.add_int(i64::from(code))?;
    start.add_str_mark(RecordType::Str, phrase_len)?;
    Ok(start)
}

fn packet_failure(err: BinRpcError) -> SendError {
    SendError::Failed(std::io::Error::other(err))
}
