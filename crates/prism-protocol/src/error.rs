//! Protocol error types

use thiserror::Error;

/// Errors that can occur while reading or writing envelopes
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is not a valid envelope document
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame exceeds the configured maximum length
    #[error("Frame too large: more than {max} bytes")]
    FrameTooLarge { max: usize },

    /// Frame bytes are not UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error came from the underlying transport rather than
    /// from the frame contents.
    pub fn is_io(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }

    /// Convert into the underlying I/O error, if this is one.
    pub fn into_io(self) -> Result<std::io::Error, Self> {
        match self {
            ProtocolError::Io(e) => Ok(e),
            other => Err(other),
        }
    }
}
