//! Envelope type for the Prism protocol
//!
//! An envelope is one request from a client: who sent it, which command to
//! run and the arguments for that command. On the wire it is a single JSON
//! document on its own line:
//!
//! ```text
//! {"ClientName":"alice","CommandName":"info","Args":["hello"]}
//! ```
//!
//! The first envelope on a new connection is the registration payload. Only
//! its `ClientName` matters; `CommandName` and `Args` may be omitted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// One decoded client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(default)]
    client_name: String,
    #[serde(default)]
    command_name: String,
    #[serde(default)]
    args: Vec<Value>,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(
        client_name: impl Into<String>,
        command_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            command_name: command_name.into(),
            args,
        }
    }

    /// Create a registration payload for the given client name
    pub fn registration(client_name: impl Into<String>) -> Self {
        Self::new(client_name, String::new(), Vec::new())
    }

    /// Name of the client that sent this envelope
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Name of the command to run
    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    /// Ordered command arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Return a copy of this envelope attributed to another client
    pub fn with_client_name(self, client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            ..self
        }
    }

    /// Parse an envelope from a single JSON document
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize as one newline-terminated frame
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        let mut frame = serde_json::to_string(self)?;
        frame.push('\n');
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let envelope = Envelope::new("alice", "info", vec![json!("hello")]);
        let frame = envelope.to_frame().unwrap();

        assert_eq!(
            frame,
            "{\"ClientName\":\"alice\",\"CommandName\":\"info\",\"Args\":[\"hello\"]}\n"
        );
    }

    #[test]
    fn test_registration_payload_defaults() {
        let envelope = Envelope::from_json(r#"{"ClientName":"bob"}"#).unwrap();
        assert_eq!(envelope.client_name(), "bob");
        assert_eq!(envelope.command_name(), "");
        assert!(envelope.args().is_empty());
    }

    #[test]
    fn test_missing_client_name_is_empty() {
        let envelope = Envelope::from_json(r#"{"CommandName":"info"}"#).unwrap();
        assert!(envelope.client_name().is_empty());
    }

    #[test]
    fn test_mixed_argument_types() {
        let envelope =
            Envelope::from_json(r#"{"ClientName":"c","CommandName":"x","Args":[1,null,"s",{"k":true}]}"#)
                .unwrap();
        assert_eq!(envelope.args().len(), 4);
        assert_eq!(envelope.args()[0], json!(1));
        assert!(envelope.args()[1].is_null());
    }

    #[test]
    fn test_malformed_document() {
        let result = Envelope::from_json("{not json");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_with_client_name() {
        let envelope = Envelope::new("mallory", "warn", vec![json!("x")]).with_client_name("alice");
        assert_eq!(envelope.client_name(), "alice");
        assert_eq!(envelope.command_name(), "warn");
    }
}
