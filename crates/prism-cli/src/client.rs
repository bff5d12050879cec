//! Relay client
//!
//! Opens a TCP connection, registers under a name and sends one envelope
//! per request. The relay never answers, so sending only confirms that the
//! bytes left this process.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::net::TcpStream;

use prism_protocol::{Envelope, EnvelopeWriter};

/// A registered connection to the relay
pub struct PrismClient {
    name: String,
    address: String,
    writer: EnvelopeWriter<TcpStream>,
}

impl PrismClient {
    /// Connect to `address` and register as `name`
    pub async fn connect(address: &str, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            anyhow::bail!("Client name must not be empty");
        }

        tracing::debug!("Connecting to relay at {}", address);

        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to relay at {}. Is it running?", address))?;
        stream.set_nodelay(true)?;

        let mut writer = EnvelopeWriter::new(stream);
        writer
            .write_envelope(&Envelope::registration(name.clone()))
            .await
            .context("Failed to send registration")?;

        tracing::debug!(client = %name, "Registered with relay");

        Ok(Self {
            name,
            address: address.to_string(),
            writer,
        })
    }

    /// Name this client registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relay address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a command with arbitrary arguments
    pub async fn send(&mut self, command: &str, args: Vec<Value>) -> Result<()> {
        let envelope = Envelope::new(self.name.clone(), command, args);
        self.writer
            .write_envelope(&envelope)
            .await
            .with_context(|| format!("Failed to send '{}' request", command))
    }

    /// Send an informational message
    pub async fn info(&mut self, text: &str) -> Result<()> {
        self.send("info", vec![Value::from(text)]).await
    }

    /// Send a warning
    pub async fn warn(&mut self, text: &str) -> Result<()> {
        self.send("warn", vec![Value::from(text)]).await
    }

    /// Send an error
    pub async fn error(&mut self, text: &str) -> Result<()> {
        self.send("error", vec![Value::from(text)]).await
    }

    /// Close the connection; the relay unregisters the client
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await.context("Failed to close connection")
    }
}

impl std::fmt::Debug for PrismClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrismClient")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Interpret a command-line argument.
///
/// Valid JSON is sent as-is; anything else is sent as a string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
