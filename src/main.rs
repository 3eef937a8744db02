//! EmberKV server entry point.
//!
//! Sets up logging, the storage engine, and the expiry sweeper, then
//! accepts connections until SIGINT or SIGTERM requests a graceful
//! shutdown. Exits 0 on a clean stop and 1 if the listener cannot be
//! bound.

use anyhow::{bail, Context};
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::storage::{start_expiry_sweeper, Engine};
use emberkv::CommandHandler;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// How long shutdown waits for in-flight connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Server configuration, from positional arguments:
/// `emberkv [port] [bind_address]`.
struct Config {
    port: u16,
    bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: emberkv::DEFAULT_PORT,
            bind: emberkv::DEFAULT_BIND.to_string(),
        }
    }
}

impl Config {
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        if args.len() > 3 {
            bail!("usage: emberkv [port] [bind_address]");
        }

        let mut config = Config::default();
        if let Some(port) = args.get(1) {
            config.port = port
                .parse()
                .with_context(|| format!("invalid port '{}'", port))?;
        }
        if let Some(bind) = args.get(2) {
            config.bind = bind.clone();
        }
        Ok(config)
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
  ┌─────────────────────────────────────────────┐
  │  EmberKV v{:<8}                          │
  │  In-memory key-value server                 │
  └─────────────────────────────────────────────┘

Listening on {}
Use Ctrl+C to shut down gracefully.
"#,
        emberkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args()?;

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let engine = Arc::new(RwLock::new(Engine::new()));
    let sweeper = start_expiry_sweeper(Arc::clone(&engine));
    let stats = Arc::new(ConnectionStats::new());
    let command_handler = CommandHandler::new(Arc::clone(&engine), Arc::clone(&stats));

    let listener = match TcpListener::bind(config.bind_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %config.bind_address(), error = %e, "Failed to bind listener");
            return Err(e).context("bind failed");
        }
    };

    print_banner(&config);
    info!(address = %config.bind_address(), "Server started");

    tokio::select! {
        _ = accept_loop(listener, command_handler, Arc::clone(&stats)) => {}
        _ = shutdown_signal() => {}
    }

    // Listener is closed once the select completes; give in-flight
    // connections a moment to finish writing before the process exits
    sweeper.stop();
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while stats.active_connections.load(Ordering::Relaxed) > 0
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Accepts connections until the listener is dropped.
async fn accept_loop(
    listener: TcpListener,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    command_handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Completes when SIGINT or SIGTERM is delivered.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
                _ = term.recv() => info!("SIGTERM received, shutting down"),
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGINT received, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
