//! Server configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use prism_protocol::DEFAULT_MAX_FRAME_LENGTH;

use super::serde_utils::duration_millis;

/// Default TCP port for the relay (loopback only)
pub const DEFAULT_PORT: u16 = 7420;

/// Configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept client connections on
    pub bind_address: String,

    /// Delay between two passes over the pending requests
    #[serde(with = "duration_millis")]
    pub process_interval: Duration,

    /// Maximum length of one envelope frame in bytes
    pub max_frame_length: usize,

    /// Capacity of the lifecycle event broadcast channel
    pub event_capacity: usize,

    /// Capacity of the channel carrying listener outcomes to the server
    pub listener_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("127.0.0.1:{}", DEFAULT_PORT),
            process_interval: Duration::from_millis(10),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            event_capacity: 1024,
            listener_channel_capacity: 256,
        }
    }
}
