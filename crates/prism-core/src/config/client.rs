//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use super::server::DEFAULT_PORT;

/// Configuration for the `prism` client CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address to connect to
    pub server_address: String,

    /// Name to register under (defaults to `prism-<pid>`)
    pub client_name: Option<String>,

    /// Pause between consecutive requests.
    ///
    /// The server holds at most one pending request per client, so a client
    /// streaming many messages must give it time to drain each one.
    #[serde(with = "duration_millis")]
    pub request_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{}", DEFAULT_PORT),
            client_name: None,
            request_delay: Duration::from_millis(50),
        }
    }
}

impl ClientConfig {
    /// Resolve the name to register under
    pub fn resolved_client_name(&self) -> String {
        self.client_name
            .clone()
            .unwrap_or_else(|| format!("prism-{}", std::process::id()))
    }
}
