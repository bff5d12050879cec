//! Prism relay server
//!
//! Accepts debug clients on a local TCP port and runs the commands they
//! send.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_core::config;
use prism_core::{Logger, TracingLogger};
use prism_server::reporter::run_reporter;
use prism_server::{CommandTable, PrismServer};

#[derive(Parser)]
#[command(name = "prism-server")]
#[command(about = "Prism debug message relay server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Milliseconds between request processing passes (overrides config)
    #[arg(long)]
    process_interval_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.config))?
        .server;

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(ms) = args.process_interval_ms {
        config.process_interval = Duration::from_millis(ms);
    }

    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
    let commands = CommandTable::with_builtins(Arc::clone(&logger));
    tracing::debug!("Registered commands: {:?}", commands.names());

    let interval = config.process_interval;
    let server = PrismServer::new(config, commands, Arc::clone(&logger));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // The reporter outlives the accept loop so final disconnects are reported
    let reporter_cancel = CancellationToken::new();
    let reporter = tokio::spawn(run_reporter(
        server.subscribe(),
        Arc::clone(&logger),
        reporter_cancel.clone(),
    ));
    let supervisor = server.spawn_supervisor(cancel.clone());

    let bind_addr = server.config().bind_address.clone();
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            cancel.cancel();
            return Err(e).with_context(|| format!("Failed to bind to {}", bind_addr));
        }
    };
    logger.server_message(&format!("Server running at {}", listener.local_addr()?));

    let driver = {
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        tokio::spawn(async move { server.drive_requests(interval, cancel).await })
    };

    server.serve(listener, cancel.clone()).await;
    cancel.cancel();

    let _ = driver.await;
    if let Some(supervisor) = supervisor {
        let _ = supervisor.await;
    }

    let disconnected = server.disconnect_all().await;
    if disconnected > 0 {
        tracing::info!("Disconnected {} clients", disconnected);
    }
    reporter_cancel.cancel();
    let _ = reporter.await;

    tracing::info!("Prism server shutdown complete");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
