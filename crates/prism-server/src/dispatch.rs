//! Command dispatch table

use std::collections::HashMap;
use std::sync::Arc;

use prism_core::{ClientName, Command, RequestError};
use prism_protocol::Envelope;

/// Command handlers indexed by command name
///
/// Built once before the server starts and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct CommandTable {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a handler, returning the one it replaced
    pub fn register(
        &mut self,
        name: impl Into<String>,
        command: Arc<dyn Command>,
    ) -> Option<Arc<dyn Command>> {
        self.commands.insert(name.into(), command)
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_command(mut self, name: impl Into<String>, command: impl Command + 'static) -> Self {
        self.register(name, Arc::new(command));
        self
    }

    /// Look up a handler
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Whether a handler is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run the handler named by the envelope.
    ///
    /// An unregistered name is [`RequestError::UnknownCommand`]; a handler
    /// error is wrapped in [`RequestError::CommandFailed`].
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), RequestError> {
        let name = envelope.command_name();
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| RequestError::UnknownCommand {
                client: ClientName::new(envelope.client_name()),
                command: name.to_string(),
            })?;

        command
            .execute(envelope, envelope.args())
            .await
            .map_err(|source| RequestError::CommandFailed {
                command: name.to_string(),
                source,
            })
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prism_core::CommandError;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    #[async_trait]
    impl Command for Recorder {
        async fn execute(&self, envelope: &Envelope, args: &[Value]) -> Result<(), CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((envelope.client_name().to_string(), args.to_vec()));
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl Command for Refuse {
        async fn execute(&self, _envelope: &Envelope, _args: &[Value]) -> Result<(), CommandError> {
            Err(CommandError::Failed("refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_invokes_handler_with_args() {
        let recorder = Arc::new(Recorder::default());
        let mut table = CommandTable::new();
        table.register("info", recorder.clone());

        let envelope = Envelope::new("alice", "info", vec![json!("hello")]);
        table.dispatch(&envelope).await.unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "alice");
        assert_eq!(calls[0].1, vec![json!("hello")]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let table = CommandTable::new();
        let envelope = Envelope::new("alice", "launch-missiles", vec![]);

        let err = table.dispatch(&envelope).await.unwrap_err();
        match err {
            RequestError::UnknownCommand { client, command } => {
                assert_eq!(client.as_str(), "alice");
                assert_eq!(command, "launch-missiles");
            }
            other => panic!("Expected UnknownCommand, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let table = CommandTable::new().with_command("nope", Refuse);
        let err = table
            .dispatch(&Envelope::new("alice", "nope", vec![]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RequestError::CommandFailed { ref command, source: CommandError::Failed(_) } if command == "nope"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut table = CommandTable::new();
        assert!(table.register("x", Arc::new(Refuse)).is_none());
        assert!(table.register("x", Arc::new(Refuse)).is_some());
        assert_eq!(table.len(), 1);
        assert!(table.contains("x"));
    }
}
