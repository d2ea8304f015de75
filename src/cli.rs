//! Command line interface for the `binrpc` binary.
//!
//! `serve` runs a listener with the built-in methods; `call` sends one
//! request and prints the reply.

use clap::{Args, Parser, Subcommand};

/// Command line arguments for the `binrpc` binary.
#[derive(Debug, Parser)]
#[command(name = "binrpc", version, about = "BinRPC control server and client")]
pub struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the built-in methods until interrupted.
    Serve(ServeArgs),
    /// Call a method and print its reply.
    Call(CallArgs),
}

/// Options of `binrpc serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Endpoint to listen on (`tcp:HOST:PORT`, `udp:HOST:PORT` or
    /// `unix:PATH`); repeat for several.
    #[arg(short, long = "listen", default_value = "tcp:127.0.0.1:2049")]
    pub listen: Vec<String>,
    /// Maximum number of open stream connections.
    #[arg(long, default_value_t = 100)]
    pub max_connections: usize,
    /// Close stream connections idle for this many seconds.
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
    /// Coerce every scanned parameter to the expected type.
    #[arg(long)]
    pub autoconvert: bool,
    /// Longest fault phrase sent, in bytes.
    #[arg(long, default_value_t = 256)]
    pub max_fault_len: usize,
    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<std::net::SocketAddr>,
}

/// Options of `binrpc call`.
#[derive(Debug, Args)]
pub struct CallArgs {
    /// Server endpoint.
    #[arg(short, long, default_value = "tcp:127.0.0.1:2049")]
    pub target: String,
    /// Method name.
    pub method: String,
    /// Parameters. Integers and decimals are sent as numbers; prefix with
    /// `s:` to force a string.
    pub params: Vec<String>,
}
