//! prism-core: Core abstractions and configuration for Prism
//!
//! This crate provides the shared types, error taxonomy, configuration
//! structures and collaborator traits (logger, command) used by the server
//! and the client CLI.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::{ClientError, CommandError, ConfigError, PrismError, RequestError};
pub use logging::TracingLogger;
pub use traits::{Command, Logger};
pub use types::ClientName;
