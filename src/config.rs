//! Limits applied while processing a request.

/// Per-request limits and behaviour switches of the dispatch engine.
///
/// # Default Values
/// - `max_body_size`: 32 KiB (top level reply values)
/// - `struct_max_body_size`: 8 KiB (each nested structure or array)
/// - `printf_buffer_size`: 1024 bytes
/// - `max_fault_len`: 256 bytes, including the terminating NUL
/// - `max_msg_chunks`: 96 chunks per scatter-gather write
/// - `autoconvert`: disabled
///
/// # Examples
///
/// ```
/// use binrpc::config::EngineConfig;
///
/// let cfg = EngineConfig::default().with_autoconvert(true).with_max_msg_chunks(0);
/// let cfg = cfg.normalized();
/// assert!(cfg.autoconvert);
/// assert_eq!(cfg.max_msg_chunks, 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the root reply buffer.
    pub max_body_size: usize,
    /// Capacity of every nested structure or array buffer.
    pub struct_max_body_size: usize,
    /// Largest string `rpl_printf` and `struct_printf` may produce.
    pub printf_buffer_size: usize,
    /// Largest fault phrase, NUL included.
    pub max_fault_len: usize,
    /// Chunks collected before a reply is partially written out.
    pub max_msg_chunks: usize,
    /// Coerce every scanned parameter, not only those marked with `.`.
    pub autoconvert: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_body_size: 32 * 1024,
            struct_max_body_size: 8 * 1024,
            printf_buffer_size: 1024,
            max_fault_len: 256,
            max_msg_chunks: 96,
            autoconvert: false,
        }
    }
}

impl EngineConfig {
    /// Set the root reply buffer capacity.
    #[must_use]
    pub const fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the nested structure buffer capacity.
    #[must_use]
    pub const fn with_struct_max_body_size(mut self, size: usize) -> Self {
        self.struct_max_body_size = size;
        self
    }

    /// Set the print buffer size.
    #[must_use]
    pub const fn with_printf_buffer_size(mut self, size: usize) -> Self {
        self.printf_buffer_size = size;
        self
    }

    /// Set the fault phrase limit.
    #[must_use]
    pub const fn with_max_fault_len(mut self, len: usize) -> Self {
        self.max_fault_len = len;
        self
    }

    /// Set the chunk budget of one write.
    #[must_use]
    pub const fn with_max_msg_chunks(mut self, chunks: usize) -> Self {
        self.max_msg_chunks = chunks;
        self
    }

    /// Enable or disable global parameter coercion.
    #[must_use]
    pub const fn with_autoconvert(mut self, enabled: bool) -> Self {
        self.autoconvert = enabled;
        self
    }

    /// Clamp every limit to a usable minimum.
    ///
    /// Buffers must hold at least one record, a fault phrase at least its
    /// NUL, and a write at least the header plus one body chunk.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_body_size = self.max_body_size.max(1);
        self.struct_max_body_size = self.struct_max_body_size.max(1);
        self.printf_buffer_size = self.printf_buffer_size.max(1);
        self.max_fault_len = self.max_fault_len.clamp(1, usize::from(u16::MAX));
        self.max_msg_chunks = self.max_msg_chunks.max(2);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_body_size, 32_768);
        assert_eq!(cfg.struct_max_body_size, 8192);
        assert_eq!(cfg.max_fault_len, 256);
        assert_eq!(cfg.max_msg_chunks, 96);
        assert!(!cfg.autoconvert);
        assert_eq!(cfg.normalized(), cfg);
    }

    #[test]
    fn zero_limits_are_raised() {
        let cfg = EngineConfig::default()
            .with_max_body_size(0)
            .with_struct_max_body_size(0)
            .with_printf_buffer_size(0)
            .with_max_fault_len(0)
            .normalized();
        assert_eq!(cfg.max_body_size, 1);
        assert_eq!(cfg.struct_max_body_size, 1);
        assert_eq!(cfg.printf_buffer_size, 1);
        assert_eq!(cfg.max_fault_len, 1);
    }
}
