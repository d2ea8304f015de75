//! Utilities for driving a [`binrpc::Engine`] in tests.
//!
//! Requests are built with [`RequestBuilder`], handed to the engine together
//! with a [`RecordingTransport`], and the recorded bytes are decoded back
//! into [`Reply`](binrpc::client::Reply) values for assertions.
//!
//! ```rust
//! use binrpc::{client::Reply, registry::RegistryBuilder, value::Value};
//! use binrpc_testing::{RecordingTransport, RequestBuilder, decode_reply, engine};
//!
//! let engine = engine(RegistryBuilder::with_builtins());
//! let mut out = RecordingTransport::new();
//! engine.process_request(&RequestBuilder::new("core.echo").str("hi").build(), &mut out);
//! assert_eq!(decode_reply(&out.bytes()).1, Reply::Values(vec![Value::str("hi")]));
//! ```

pub mod logging;
pub mod packets;
pub mod transport;

use std::sync::Arc;

use binrpc::{EngineConfig, engine::Engine, registry::RegistryBuilder};
pub use logging::{LoggerHandle, logger};
pub use packets::{RequestBuilder, decode_replies, decode_reply, packet};
pub use transport::{RecordingTransport, SendMode};

/// Engine with default limits dispatching to the methods of `builder`.
#[must_use]
pub fn engine(builder: RegistryBuilder) -> Engine { engine_with(builder, EngineConfig::default()) }

/// Engine with custom limits dispatching to the methods of `builder`.
#[must_use]
pub fn engine_with(builder: RegistryBuilder, config: EngineConfig) -> Engine {
    Engine::new(Arc::new(builder.build()), config)
}
