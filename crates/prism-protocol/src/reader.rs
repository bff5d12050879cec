//! Stream reader for newline-delimited envelopes
//!
//! The same reader serves the registration handshake and the per-client
//! request listener: it is created on the read half of a fresh connection,
//! used once for the registration payload and then handed to the listener.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::envelope::Envelope;
use crate::error::ProtocolError;

/// Default maximum frame length (64 KiB, excluding the newline)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Reads one envelope per line from an async byte stream
#[derive(Debug)]
pub struct EnvelopeReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_frame_length: usize,
}

impl<R: AsyncRead + Unpin> EnvelopeReader<R> {
    /// Create a new reader with the default frame limit
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Set the maximum frame length
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Maximum accepted frame length in bytes
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Read the next envelope.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Blank lines are
    /// skipped. A final frame without a trailing newline is still decoded.
    ///
    /// Not cancel safe: if the future is dropped mid-frame, the partially
    /// read bytes are lost.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        loop {
            self.buf.clear();

            // One extra byte lets us tell "exactly at the limit" from "over it"
            let limit = self.max_frame_length as u64 + 1;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') && read as u64 == limit {
                self.discard_line().await?;
                return Err(ProtocolError::FrameTooLarge {
                    max: self.max_frame_length,
                });
            }

            let line = std::str::from_utf8(&self.buf).map_err(|_| ProtocolError::InvalidUtf8)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            tracing::trace!(bytes = read, "decoded envelope frame");
            return Envelope::from_json(trimmed).map(Some);
        }
    }

    /// Skip the rest of the current line so the next read starts on a frame
    /// boundary
    async fn discard_line(&mut self) -> Result<(), ProtocolError> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                }
            }
        }
    }

    /// Get a reference to the underlying reader
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }
}
