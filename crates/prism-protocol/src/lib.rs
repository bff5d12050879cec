//! prism-protocol: Wire protocol for the Prism debug-message relay
//!
//! Clients talk to the server with newline-delimited JSON envelopes. This
//! crate defines the envelope type and the stream reader/writer shared by
//! the registration handshake, the per-client listeners and the client
//! library.

pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use envelope::Envelope;
pub use error::ProtocolError;
pub use reader::{EnvelopeReader, DEFAULT_MAX_FRAME_LENGTH};
pub use writer::EnvelopeWriter;
