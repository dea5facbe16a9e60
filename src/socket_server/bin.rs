//! Stream Daemon Binary
//!
//! A WebSocket server that fans engine events out to connected clients.
//!
//! # Usage
//!
//! ```bash
//! stream-daemon --port 9850
//! stream-daemon --config stream.toml --host 0.0.0.0 --log-level debug
//! stream-daemon --heartbeat-secs 5
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use stream_engine::events::EventData;
use stream_engine::socket_server::ConnectionManager;
use stream_engine::{EventStreamingService, StreamError, StreamingConfig};

/// Stream Socket Server Daemon
#[derive(Parser, Debug)]
#[command(name = "stream-daemon")]
#[command(about = "Real-time event streaming daemon")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "STREAM_DAEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "STREAM_DAEMON_LOG")]
    log_level: Option<String>,

    /// Emit a system_status event every N seconds (0 = off)
    #[arg(long, default_value = "0")]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<StreamError>()
                .map(StreamError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => StreamingConfig::load_from(path)?,
        None => StreamingConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    let level = &config.logging.level;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("stream_engine={level}").parse()?)
                .add_directive(format!("stream_daemon={level}").parse()?),
        )
        .init();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let service = Arc::new(EventStreamingService::new(config));
    service.start()?;
    let manager = Arc::new(ConnectionManager::new(Arc::clone(&service)));

    if args.heartbeat_secs > 0 {
        let service = Arc::clone(&service);
        let every = Duration::from_secs(args.heartbeat_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let clients = service.get_connection_info().total_connections;
                service.emit_event(EventData::system_status(
                    "alive",
                    Some(format!("{clients} client(s) connected")),
                ));
            }
        });
    }

    // Start the TCP listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Stream daemon listening on ws://{}", addr);

    // Accept connections until Ctrl-C
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted connection from {}", peer);
                    let manager = Arc::clone(&manager);
                    tokio::spawn(async move {
                        manager.handle_connection(stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    service.stop().await?;
    Ok(())
}
