//! Logger trait

use prism_protocol::Envelope;

/// Output sink for client messages and server lifecycle reports
///
/// The per-client methods are called by commands with the envelope that
/// triggered them; the `server_*` methods report on the relay itself.
pub trait Logger: Send + Sync {
    /// Informational message from a client
    fn message(&self, text: &str, envelope: &Envelope);

    /// Warning from a client
    fn warning(&self, text: &str, envelope: &Envelope);

    /// Error from a client
    fn error(&self, text: &str, envelope: &Envelope);

    /// Informational server lifecycle message
    fn server_message(&self, text: &str);

    /// Server lifecycle warning
    fn server_warning(&self, text: &str);

    /// Server lifecycle error
    fn server_error(&self, text: &str);
}
