//! `binrpc` binary: serve the built-in methods or call a remote method.

mod cli;

use std::{process::ExitCode, time::Duration};

use binrpc::{
    client::{BinRpcClient, ClientError, DatagramClient, Reply},
    config::EngineConfig,
    listener::{CtlServer, Endpoint, ListenerConfig, ListenerError},
    registry::RegistryBuilder,
    value::Value,
};
use clap::Parser;
use cli::{CallArgs, Cli, Command, ServeArgs};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[cfg(feature = "metrics")]
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Enable structured logging for the binary and integration tests.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve(args) => serve(args).await.map(|()| ExitCode::SUCCESS),
        Command::Call(args) => call(args).await,
    };
    outcome.unwrap_or_else(|e| {
        eprintln!("binrpc: {e}");
        ExitCode::FAILURE
    })
}

async fn serve(args: ServeArgs) -> Result<(), CliError> {
    if let Some(addr) = args.metrics_listen {
        install_exporter(addr)?;
    }
    let engine_config = EngineConfig::default()
        .with_autoconvert(args.autoconvert)
        .with_max_fault_len(args.max_fault_len);
    let listener_config = ListenerConfig::default()
        .with_max_connections(args.max_connections)
        .with_idle_timeout(args.idle_timeout.map(Duration::from_secs));
    let mut server = CtlServer::from_registry(RegistryBuilder::with_builtins(), engine_config)?
        .with_config(listener_config);
    for text in &args.listen {
        server = server.bind(&text.parse()?).await?;
    }
    server.run().await?;
    Ok(())
}

async fn call(args: CallArgs) -> Result<ExitCode, CliError> {
    let params: Vec<Value> = args.params.iter().map(|p| parse_param(p)).collect();
    let reply = match args.target.parse::<Endpoint>()? {
        Endpoint::Tcp(addr) => {
            BinRpcClient::connect_tcp(addr.as_str())
                .await?
                .call(&args.method, &params)
                .await?
        }
        Endpoint::Unix(path) => {
            BinRpcClient::connect_unix(path)
                .await?
                .call(&args.method, &params)
                .await?
        }
        Endpoint::Udp(addr) => {
            let peer = tokio::net::lookup_host(addr.as_str())
                .await
                .map_err(ClientError::Io)?
                .next()
                .ok_or_else(|| CliError::Resolve(addr.clone()))?;
            DatagramClient::connect(peer)
                .await?
                .call(&args.method, &params)
                .await?
        }
    };
    Ok(match reply {
        Reply::Values(values) => {
            for value in values {
                println!("{value}");
            }
            ExitCode::SUCCESS
        }
        Reply::Fault { code, phrase } => {
            eprintln!("error {code} - {phrase}");
            ExitCode::FAILURE
        }
    })
}

#[cfg(feature = "metrics")]
fn install_exporter(addr: std::net::SocketAddr) -> Result<(), CliError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    log::info!("serving metrics on {addr}");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "signature matches the exporter-enabled build"
)]
fn install_exporter(addr: std::net::SocketAddr) -> Result<(), CliError> {
    log::warn!("metrics support not compiled in; ignoring --metrics-listen {addr}");
    Ok(())
}

fn parse_param(text: &str) -> Value {
    if let Some(forced) = text.strip_prefix("s:") {
        return Value::str(forced);
    }
    if let Ok(int) = text.parse::<i64>() {
        return Value::Int(int);
    }
    match text.parse::<f64>() {
        Ok(double) if text.contains('.') => Value::Double(double),
        _ => Value::str(text),
    }
}
