//! Stream writer for newline-delimited envelopes

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::ProtocolError;

/// Writes one envelope per line to an async byte stream
#[derive(Debug)]
pub struct EnvelopeWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> EnvelopeWriter<W> {
    /// Create a new writer
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Write and flush a single envelope frame
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let frame = envelope.to_frame()?;
        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write direction of the stream
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Consume the writer, returning the underlying stream
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::EnvelopeReader;
    use serde_json::json;

    #[tokio::test]
    async fn test_writer_feeds_reader() {
        let (tx, rx) = tokio::io::duplex(1024);
        let mut writer = EnvelopeWriter::new(tx);
        let mut reader = EnvelopeReader::new(rx);

        writer
            .write_envelope(&Envelope::registration("frank"))
            .await
            .unwrap();
        writer
            .write_envelope(&Envelope::new("frank", "error", vec![json!("boom")]))
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let registration = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(registration.client_name(), "frank");

        let request = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(request.command_name(), "error");

        assert!(reader.read_envelope().await.unwrap().is_none());
    }
}
