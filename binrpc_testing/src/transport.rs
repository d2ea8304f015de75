//! A [`Transport`] that records every scatter-gather write.

use std::io::{self, IoSlice};

use binrpc::{error::SendError, transport::Transport};

/// How a [`RecordingTransport`] answers writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendMode {
    /// Accept and record every write.
    #[default]
    Accept,
    /// Fail every write with an I/O error.
    Fail,
    /// Fail every write as an oversized datagram.
    TooLarge,
}

/// Transport recording each `send_vectored` call as its list of chunks.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Vec<Vec<Vec<u8>>>,
    attempts: usize,
    mode: SendMode,
}

impl RecordingTransport {
    /// Transport accepting every write.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Transport answering writes according to `mode`.
    #[must_use]
    pub fn with_mode(mode: SendMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Accepted writes, each as the chunks it was made of.
    #[must_use]
    pub fn writes(&self) -> &[Vec<Vec<u8>>] { &self.writes }

    /// Number of write attempts, including refused ones.
    #[must_use]
    pub const fn attempts(&self) -> usize { self.attempts }

    /// All accepted bytes, in order.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> { self.writes.iter().flatten().flatten().copied().collect() }
}

impl Transport for RecordingTransport {
    fn send_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<(), SendError> {
        self.attempts += 1;
        match self.mode {
            SendMode::Accept => {
                self.writes.push(bufs.iter().map(|b| b.to_vec()).collect());
                Ok(())
            }
            SendMode::Fail => Err(SendError::Failed(io::Error::other("refused by test"))),
            SendMode::TooLarge => Err(SendError::TooLarge {
                size: bufs.iter().map(|b| b.len()).sum(),
                max: 0,
            }),
        }
    }
}
