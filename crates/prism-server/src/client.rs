//! Registered client handle

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use prism_core::ClientName;

/// Read half of a client connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a client connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A client that completed registration
///
/// The read half of the connection belongs to the client's request
/// listener; the handle keeps the write half so the connection stays open
/// for as long as the client is registered.
pub struct ClientHandle {
    name: ClientName,
    peer: Option<SocketAddr>,
    connected_at: Instant,
    writer: Mutex<Option<BoxedWriter>>,
}

impl ClientHandle {
    /// Create a new handle
    pub fn new(name: ClientName, peer: Option<SocketAddr>, writer: BoxedWriter) -> Self {
        Self {
            name,
            peer,
            connected_at: Instant::now(),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Registered name
    pub fn name(&self) -> &ClientName {
        &self.name
    }

    /// Remote address, when the transport has one
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// When registration completed
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Shut down the write half of the connection.
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(client = %self.name, "Error closing connection: {}", e);
            }
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
