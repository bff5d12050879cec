//! Lifecycle notifications
//!
//! Every state change in the registry and the request manager is published
//! on a broadcast channel. Subscribers (the console reporter, tests, any
//! supervisory loop) call [`EventBus::subscribe`] and receive every event
//! emitted after that point.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;

use prism_core::ClientName;
use prism_protocol::Envelope;

use crate::listener::ListenerId;

/// A lifecycle notification
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A raw connection was accepted and its registration payload is awaited
    RegistrationStarted { peer: Option<SocketAddr> },
    /// A connection completed registration
    RegistrationFinished { client: ClientName },
    /// A client was inserted into the registry
    ClientAdded { client: ClientName },
    /// A client was removed from the registry
    ClientRemoved { client: ClientName },
    /// A request entered the pending table
    RequestAdded { envelope: Arc<Envelope> },
    /// A request left the pending table
    RequestRemoved { envelope: Arc<Envelope> },
    /// A request was dispatched (successfully or not)
    RequestProcessed { envelope: Arc<Envelope> },
    /// A request listener was attached to a client
    ListenerAdded {
        client: ClientName,
        listener: ListenerId,
    },
    /// A request listener was cancelled and discarded
    ListenerRemoved {
        client: ClientName,
        listener: ListenerId,
    },
    /// A request listener hit a transport error and stopped
    ListenerFailed {
        client: ClientName,
        listener: ListenerId,
        error: Arc<std::io::Error>,
    },
}

/// Broadcast channel for [`ServerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
