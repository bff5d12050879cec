//! State coordinator for cross-collection atomicity
//!
//! The client registry, the listener table and the pending-request table
//! are separate concurrent maps. Operations that touch more than one of
//! them go through the [`StateCoordinator`] so they cannot interleave.
//!
//! # Atomicity Model
//!
//! Registering a client (registry insert + listener attach) and
//! disconnecting one (registry remove + listener detach + pending drop) take
//! the write lock. Enqueueing a request from a listener takes the read lock
//! and only succeeds while that listener is still the one attached, so a
//! request can never be queued for a client that is already gone.
//!
//! This prevents races such as:
//! - A request arriving from a listener that was detached a moment earlier
//! - A disconnect triggered by a stale listener removing a newer client of
//!   the same name

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use prism_core::{ClientError, PrismError, RequestError};
use prism_protocol::{Envelope, EnvelopeReader};

use crate::client::{BoxedReader, ClientHandle};
use crate::listener::ListenerId;
use crate::registry::ClientRegistry;
use crate::requests::RequestManager;

/// What an atomic disconnect removed
#[derive(Debug)]
pub struct Disconnected {
    /// The removed client; its connection is already closed
    pub handle: Arc<ClientHandle>,
    /// The listener that was detached, if the client had one
    pub listener: Option<ListenerId>,
    /// The pending request that was dropped, if any
    pub dropped_request: Option<Arc<Envelope>>,
}

/// Coordinates access to clients, listeners and pending requests.
///
/// Plain reads go straight to `clients` or `requests`. Anything that must
/// keep the collections consistent with each other uses one of the
/// `atomic_*` helpers or takes [`read`](Self::read) /
/// [`write`](Self::write) itself.
pub struct StateCoordinator {
    /// Purely for coordination; guards no data of its own
    inner: RwLock<()>,

    /// Registered clients
    pub clients: Arc<ClientRegistry>,

    /// Pending requests and request listeners
    pub requests: Arc<RequestManager>,
}

impl StateCoordinator {
    /// Create a coordinator over existing collections
    pub fn new(clients: Arc<ClientRegistry>, requests: Arc<RequestManager>) -> Self {
        Self {
            inner: RwLock::new(()),
            clients,
            requests,
        }
    }

    /// Acquire a read lock for a consistent view across collections
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Acquire a write lock for exclusive cross-collection changes
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }

    /// Atomically insert a client and start its listener.
    ///
    /// If the listener cannot be attached the registry insert is rolled back
    /// and the connection closed.
    pub async fn atomic_register(
        &self,
        handle: ClientHandle,
        reader: EnvelopeReader<BoxedReader>,
    ) -> Result<Arc<ClientHandle>, PrismError> {
        let lock = self.write().await;

        let handle = self.clients.add(handle)?;

        match self.requests.attach_listener(handle.name().clone(), reader) {
            Ok(_) => Ok(handle),
            Err(e) => {
                let _ = self.clients.remove_handle(&handle);
                drop(lock);
                handle.close().await;
                Err(e.into())
            }
        }
    }

    /// Atomically remove a client, its listener and its pending request.
    ///
    /// The client's connection is closed once the lock is released.
    pub async fn atomic_disconnect(&self, client: &str) -> Result<Disconnected, ClientError> {
        let lock = self.write().await;
        let disconnected = self.disconnect_locked(client)?;
        drop(lock);

        disconnected.handle.close().await;
        Ok(disconnected)
    }

    /// Disconnect on behalf of a listener.
    ///
    /// Returns `None` without touching anything if `listener` is no longer
    /// the one attached to `client`.
    pub async fn disconnect_listener(
        &self,
        client: &str,
        listener: ListenerId,
    ) -> Option<Result<Disconnected, ClientError>> {
        let lock = self.write().await;
        if !self.requests.is_current_listener(client, listener) {
            return None;
        }
        let result = self.disconnect_locked(client);
        drop(lock);

        if let Ok(disconnected) = &result {
            disconnected.handle.close().await;
        }
        Some(result)
    }

    /// Disconnect every registered client
    pub async fn disconnect_all(&self) -> Vec<Disconnected> {
        let mut disconnected = Vec::new();
        for name in self.clients.names() {
            if let Ok(d) = self.atomic_disconnect(name.as_str()).await {
                disconnected.push(d);
            }
        }
        disconnected
    }

    /// Queue a request read by `listener`.
    ///
    /// Returns `Ok(None)` if the listener has been detached in the meantime;
    /// the envelope is discarded.
    pub async fn enqueue(
        &self,
        listener: ListenerId,
        envelope: Envelope,
    ) -> Result<Option<Arc<Envelope>>, RequestError> {
        let _lock = self.read().await;

        if !self
            .requests
            .is_current_listener(envelope.client_name(), listener)
        {
            tracing::debug!(
                client = envelope.client_name(),
                listener = %listener,
                "Dropping request from detached listener"
            );
            return Ok(None);
        }

        self.requests.add_request(envelope).map(Some)
    }

    /// Registry first, then listener, then queue. Caller holds the write lock.
    fn disconnect_locked(&self, client: &str) -> Result<Disconnected, ClientError> {
        let handle = self.clients.remove(client)?;
        let listener = self.requests.detach_listener(client);
        let dropped_request = self.requests.remove_request(client).ok();

        Ok(Disconnected {
            handle,
            listener,
            dropped_request,
        })
    }
}
