//! Listener limits and the accept-loop back-off.

use std::time::Duration;

/// Configuration for exponential back-off timing in the accept loop.
///
/// Controls retry behaviour when `accept()` calls fail on a stream listener
/// or `recv_from()` fails on a datagram socket. The back-off starts at
/// `initial_delay` and doubles on each failure, capped at `max_delay`.
///
/// # Default Values
/// - `initial_delay`: 10 milliseconds
/// - `max_delay`: 1 second
///
/// # Invariants
/// - `initial_delay` must not exceed `max_delay`
/// - `initial_delay` must be at least 1 millisecond
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay used for the first retry after a failure.
    pub initial_delay: Duration,
    /// Maximum back-off delay once retries have increased exponentially.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to sane bounds and ensure `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use binrpc::listener::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::from_millis(1),
    /// };
    ///
    /// let normalized = cfg.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to use after a failure that followed a wait of `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }
}

/// Limits applied by the listener to its sockets and connections.
///
/// # Default Values
/// - `max_connections`: 100 open stream connections
/// - `stream_buffer_size`: 65535 bytes of unprocessed input per connection
/// - `max_datagram_size`: 65535 bytes, for requests and replies alike
/// - `idle_timeout`: none
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Stream connections accepted at the same time; further ones are closed
    /// right after `accept`.
    pub max_connections: usize,
    /// Receive buffer of each stream connection. A packet that does not fit
    /// closes the connection.
    pub stream_buffer_size: usize,
    /// Largest datagram read or written.
    pub max_datagram_size: usize,
    /// Close stream connections that stay silent this long.
    pub idle_timeout: Option<Duration>,
    /// Back-off applied after socket errors.
    pub backoff: BackoffConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            stream_buffer_size: 65_535,
            max_datagram_size: 65_535,
            idle_timeout: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Set the connection limit.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection receive buffer size.
    #[must_use]
    pub const fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Set the datagram size limit.
    #[must_use]
    pub const fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Set or clear the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the back-off configuration.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Raise buffers to hold at least a packet header and normalise the
    /// back-off.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.stream_buffer_size = self.stream_buffer_size.max(crate::packet::MAX_HEADER_SIZE);
        self.max_datagram_size = self.max_datagram_size.max(crate::packet::MAX_HEADER_SIZE);
        self.backoff = self.backoff.normalized();
        self
    }
}
