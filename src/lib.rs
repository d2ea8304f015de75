#![doc(html_root_url = "https://docs.rs/binrpc/latest")]
//! Public API for the `binrpc` library.
//!
//! This crate implements the request side of the BinRPC control protocol:
//! packet parsing, dispatch of requests to registered command handlers, the
//! reply builder handlers write into, and the fault path. A tokio listener
//! and client are provided on top.
//!
//! ```
//! use std::sync::Arc;
//!
//! use binrpc::{
//!     config::EngineConfig,
//!     engine::Engine,
//!     registry::RegistryBuilder,
//!     rpc::Arg,
//!     transport::BufferTransport,
//! };
//!
//! let registry = RegistryBuilder::new()
//!     .register("demo.answer", &["Returns 42."], |rpc| {
//!         let _ = rpc.add(&[Arg::Int(42)]);
//!     })
//!     .expect("unique name")
//!     .build();
//! let engine = Engine::new(Arc::new(registry), EngineConfig::default());
//!
//! // REQUEST packet, cookie 1, body: "demo.answer"
//! let mut request = vec![0xA1, 0x00, 0x0e, 0x01, 0x91, 0x0c];
//! request.extend_from_slice(b"demo.answer\0");
//! let mut out = BufferTransport::new();
//! let processed = engine.process_request(&request, &mut out);
//! assert_eq!(processed.consumed, request.len());
//! // REPLY packet, cookie 1, body: INT 42
//! assert_eq!(out.as_slice(), &[0xA1, 0x10, 0x02, 0x01, 0x10, 0x2a]);
//! ```

pub mod builder;
pub mod byte_order;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fault;
pub mod format;
pub mod gc;
pub mod listener;
pub mod metrics;
pub mod packet;
pub mod panic;
pub mod registry;
pub mod rpc;
pub mod transport;
pub mod value;

pub use config::EngineConfig;
pub use engine::{Disposition, Engine, Processed};
pub use error::{BinRpcError, Result, RpcError, SendError};
pub use registry::{MethodRegistry, RegistryBuilder};
pub use rpc::{Arg, Rpc, Scan, ScanValue};
pub use value::Value;
