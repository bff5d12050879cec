//! Built-in commands
//!
//! `info`, `warn` and `error` write their first argument through the
//! logger at the matching level. A non-string first argument is logged as
//! an empty message; a missing one is an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use prism_core::{Command, CommandError, Logger};
use prism_protocol::Envelope;

use crate::dispatch::CommandTable;

/// Name of the informational message command
pub const INFO: &str = "info";
/// Name of the warning command
pub const WARN: &str = "warn";
/// Name of the error command
pub const ERROR: &str = "error";

/// Severity a [`MessageCommand`] logs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warn,
    Error,
}

/// Logs the first argument at a fixed level
pub struct MessageCommand {
    level: MessageLevel,
    logger: Arc<dyn Logger>,
}

impl MessageCommand {
    /// Create a new message command
    pub fn new(level: MessageLevel, logger: Arc<dyn Logger>) -> Self {
        Self { level, logger }
    }
}

#[async_trait]
impl Command for MessageCommand {
    async fn execute(&self, envelope: &Envelope, args: &[Value]) -> Result<(), CommandError> {
        let text = args
            .first()
            .ok_or(CommandError::MissingArgument { index: 0 })?
            .as_str()
            .unwrap_or_default();

        match self.level {
            MessageLevel::Info => self.logger.message(text, envelope),
            MessageLevel::Warn => self.logger.warning(text, envelope),
            MessageLevel::Error => self.logger.error(text, envelope),
        }
        Ok(())
    }
}

/// Register `info`, `warn` and `error` into `table`
pub fn register_builtins(table: &mut CommandTable, logger: Arc<dyn Logger>) {
    table.register(
        INFO,
        Arc::new(MessageCommand::new(MessageLevel::Info, Arc::clone(&logger))),
    );
    table.register(
        WARN,
        Arc::new(MessageCommand::new(MessageLevel::Warn, Arc::clone(&logger))),
    );
    table.register(ERROR, Arc::new(MessageCommand::new(MessageLevel::Error, logger)));
}

impl CommandTable {
    /// A table holding only the built-in commands
    pub fn with_builtins(logger: Arc<dyn Logger>) -> Self {
        let mut table = Self::new();
        register_builtins(&mut table, logger);
        table
    }
}
