//! Command trait

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CommandError;
use prism_protocol::Envelope;

/// A handler registered under a command name
///
/// Handlers are resolved by the envelope's command name and invoked with the
/// envelope and its arguments. Anything a handler needs beyond that (a
/// logger, a file, a counter) is given to it when it is constructed.
#[async_trait]
pub trait Command: Send + Sync {
    /// Run the command for one request
    async fn execute(&self, envelope: &Envelope, args: &[Value]) -> Result<(), CommandError>;
}
