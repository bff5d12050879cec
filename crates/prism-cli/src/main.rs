//! Prism CLI
//!
//! Sends debug messages to a running Prism relay.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_cli::output::{print_error, print_info, print_success};
use prism_cli::{parse_arg, PrismClient};
use prism_core::config::{self, ClientConfig};

#[derive(Parser)]
#[command(name = "prism")]
#[command(author, version, about = "Send debug messages to a Prism relay")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Relay address (overrides config)
    #[arg(short, long, global = true, env = "PRISM_ADDRESS")]
    address: Option<String>,

    /// Name to register under (overrides config)
    #[arg(short, long, global = true, env = "PRISM_NAME")]
    name: Option<String>,

    /// Milliseconds to wait after each request (overrides config)
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an informational message
    Info {
        /// Message text (words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Send a warning
    Warn {
        /// Message text (words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Send an error
    Error {
        /// Message text (words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Send any command with JSON arguments
    Send {
        /// Command name
        command: String,
        /// Arguments; valid JSON is sent as-is, anything else as a string
        args: Vec<String>,
    },

    /// Forward each line of stdin as a message
    Pipe {
        /// Command to send each line with
        #[arg(long, default_value = "info")]
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let mut config: ClientConfig = config::load_or_default(cli.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?
        .client;

    if let Some(address) = cli.address {
        config.server_address = address;
    }
    if let Some(name) = cli.name {
        config.client_name = Some(name);
    }
    if let Some(ms) = cli.delay_ms {
        config.request_delay = Duration::from_millis(ms);
    }

    let quiet = cli.quiet;
    if let Err(e) = run(cli.command, &config, quiet).await {
        print_error(&format!("{:#}", e));
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: &ClientConfig, quiet: bool) -> Result<()> {
    let name = config.resolved_client_name();
    let mut client = PrismClient::connect(&config.server_address, name).await?;

    match command {
        Commands::Info { text } => client.info(&text.join(" ")).await?,
        Commands::Warn { text } => client.warn(&text.join(" ")).await?,
        Commands::Error { text } => client.error(&text.join(" ")).await?,
        Commands::Send { command, args } => {
            let args = args.iter().map(String::as_str).map(parse_arg).collect();
            client.send(&command, args).await?;
            if !quiet {
                print_success(&format!("Sent '{}' as {}", command, client.name()));
            }
        }
        Commands::Pipe { command } => {
            let forwarded = pipe_stdin(&mut client, &command, config.request_delay).await?;
            if !quiet {
                print_info(&format!("Forwarded {} lines as {}", forwarded, client.name()));
            }
        }
    }

    // The relay drops a client's pending request when it disconnects, so
    // give it one processing pass before hanging up
    tokio::time::sleep(config.request_delay).await;
    client.close().await
}

async fn pipe_stdin(client: &mut PrismClient, command: &str, delay: Duration) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        if forwarded > 0 {
            tokio::time::sleep(delay).await;
        }
        client.send(command, vec![line.into()]).await?;
        forwarded += 1;
    }

    Ok(forwarded)
}
