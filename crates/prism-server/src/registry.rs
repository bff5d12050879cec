//! Client registry
//!
//! Concurrent name → handle map. Names are unique: the check and the insert
//! happen under the same map entry, so two connections racing to register
//! the same name cannot both succeed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use prism_core::{ClientError, ClientName};

use crate::client::ClientHandle;
use crate::events::{EventBus, ServerEvent};

/// Registered clients indexed by name
pub struct ClientRegistry {
    clients: DashMap<ClientName, Arc<ClientHandle>>,
    events: EventBus,
}

impl ClientRegistry {
    /// Create an empty registry publishing on `events`
    pub fn new(events: EventBus) -> Self {
        Self {
            clients: DashMap::new(),
            events,
        }
    }

    /// Insert a client.
    ///
    /// Fails with [`ClientError::AlreadyExists`] if the name is taken, in
    /// which case the registry is left untouched and `handle` is dropped.
    pub fn add(&self, handle: ClientHandle) -> Result<Arc<ClientHandle>, ClientError> {
        let name = handle.name().clone();

        let handle = match self.clients.entry(name.clone()) {
            Entry::Occupied(_) => return Err(ClientError::AlreadyExists(name)),
            Entry::Vacant(entry) => {
                let handle = Arc::new(handle);
                entry.insert(Arc::clone(&handle));
                handle
            }
        };

        tracing::debug!(client = %name, "Client added to registry");
        self.events.emit(ServerEvent::ClientAdded { client: name });
        Ok(handle)
    }

    /// Remove a client by name
    pub fn remove(&self, name: &str) -> Result<Arc<ClientHandle>, ClientError> {
        let (name, handle) = self
            .clients
            .remove(name)
            .ok_or_else(|| ClientError::DoesNotExist(ClientName::new(name)))?;

        tracing::debug!(client = %name, "Client removed from registry");
        self.events.emit(ServerEvent::ClientRemoved { client: name });
        Ok(handle)
    }

    /// Remove exactly this handle.
    ///
    /// Fails with [`ClientError::DoesNotExist`] if the name is absent or now
    /// belongs to a different connection.
    pub fn remove_handle(&self, handle: &Arc<ClientHandle>) -> Result<(), ClientError> {
        let removed = self
            .clients
            .remove_if(handle.name(), |_, current| Arc::ptr_eq(current, handle));

        match removed {
            Some((name, _)) => {
                self.events.emit(ServerEvent::ClientRemoved { client: name });
                Ok(())
            }
            None => Err(ClientError::DoesNotExist(handle.name().clone())),
        }
    }

    /// Get a client by name
    pub fn get(&self, name: &str) -> Option<Arc<ClientHandle>> {
        self.clients.get(name).map(|r| Arc::clone(&r))
    }

    /// Whether a client with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Snapshot of registered names, sorted
    pub fn names(&self) -> Vec<ClientName> {
        let mut names: Vec<ClientName> = self.clients.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// List all clients
    pub fn list(&self) -> Vec<Arc<ClientHandle>> {
        self.clients.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
