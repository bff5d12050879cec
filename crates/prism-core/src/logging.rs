//! `tracing`-backed logger
//!
//! Client messages are emitted under the `prism::client` target with the
//! client name as a structured field; server lifecycle messages go to
//! `prism::server`. Formatting and output are left to whatever subscriber
//! the host binary installs.

use prism_protocol::Envelope;

use crate::traits::Logger;

/// Logger that forwards everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    /// Create a new tracing logger
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn message(&self, text: &str, envelope: &Envelope) {
        tracing::info!(target: "prism::client", client = envelope.client_name(), "{}", text);
    }

    fn warning(&self, text: &str, envelope: &Envelope) {
        tracing::warn!(target: "prism::client", client = envelope.client_name(), "{}", text);
    }

    fn error(&self, text: &str, envelope: &Envelope) {
        tracing::error!(target: "prism::client", client = envelope.client_name(), "{}", text);
    }

    fn server_message(&self, text: &str) {
        tracing::info!(target: "prism::server", "{}", text);
    }

    fn server_warning(&self, text: &str) {
        tracing::warn!(target: "prism::server", "{}", text);
    }

    fn server_error(&self, text: &str) {
        tracing::error!(target: "prism::server", "{}", text);
    }
}
