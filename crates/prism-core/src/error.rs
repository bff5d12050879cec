//! Core error types for Prism

use prism_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::ClientName;

/// Top-level error type for the Prism ecosystem
#[derive(Error, Debug)]
pub enum PrismError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client registry error
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Request queue or dispatch error
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client registry errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// A client with this name is already registered
    #[error("Client already exists: {0}")]
    AlreadyExists(ClientName),

    /// No client with this name is registered
    #[error("Client does not exist: {0}")]
    DoesNotExist(ClientName),

    /// The registration payload was unusable
    #[error("Invalid registration data: {reason}")]
    InvalidRegistrationData {
        reason: String,
        #[source]
        source: Option<ProtocolError>,
    },
}

impl ClientError {
    /// Registration failure without an underlying protocol error
    pub fn invalid_registration(reason: impl Into<String>) -> Self {
        ClientError::InvalidRegistrationData {
            reason: reason.into(),
            source: None,
        }
    }
}

/// Request queue, listener and dispatch errors
#[derive(Error, Debug)]
pub enum RequestError {
    /// The client already has a pending request
    #[error("Too many requests: client {0} already has a pending request")]
    TooManyRequests(ClientName),

    /// No pending request exists for this client
    #[error("Client request does not exist: {0}")]
    DoesNotExist(ClientName),

    /// The client already has a request listener
    #[error("Client request listener already exists: {0}")]
    ListenerAlreadyExists(ClientName),

    /// No handler is registered for the command name
    #[error("Unknown command '{command}' from client {client}")]
    UnknownCommand { client: ClientName, command: String },

    /// The command handler returned an error
    #[error("Command '{command}' failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: CommandError,
    },

    /// The command handler panicked
    #[error("Command '{command}' panicked: {message}")]
    CommandPanicked { command: String, message: String },
}

/// Errors returned by command handlers
#[derive(Error, Debug)]
pub enum CommandError {
    /// A required positional argument is missing
    #[error("Missing argument at position {index}")]
    MissingArgument { index: usize },

    /// Any other command failure
    #[error("{0}")]
    Failed(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
