//! Metric helpers for `binrpc`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper compiles to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open stream connections.
pub const CONNECTIONS_ACTIVE: &str = "binrpc_connections_active";
/// Name of the counter tracking complete request packets.
pub const REQUESTS_TOTAL: &str = "binrpc_requests_total";
/// Name of the counter tracking fault replies, labelled by code.
pub const FAULTS_TOTAL: &str = "binrpc_faults_total";
/// Name of the counter tracking failed reply transmissions.
pub const SEND_ERRORS_TOTAL: &str = "binrpc_send_errors_total";
/// Name of the counter tracking reads that ended mid-packet.
pub const PARTIAL_READS_TOTAL: &str = "binrpc_partial_reads_total";
/// Name of the counter tracking handlers that panicked.
pub const HANDLER_PANICS_TOTAL: &str = "binrpc_handler_panics_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a complete request packet.
pub fn inc_requests() {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_TOTAL).increment(1);
}

/// Record a fault reply with the given code.
pub fn inc_faults(code: i32) {
    #[cfg(feature = "metrics")]
    counter!(FAULTS_TOTAL, "code" => code.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = code;
}

/// Record a reply or fault the transport refused.
pub fn inc_send_errors() {
    #[cfg(feature = "metrics")]
    counter!(SEND_ERRORS_TOTAL).increment(1);
}

/// Record a read that ended before the packet was complete.
pub fn inc_partial_reads() {
    #[cfg(feature = "metrics")]
    counter!(PARTIAL_READS_TOTAL).increment(1);
}

/// Record a handler panic.
pub fn inc_handler_panics() {
    #[cfg(feature = "metrics")]
    counter!(HANDLER_PANICS_TOTAL).increment(1);
}
