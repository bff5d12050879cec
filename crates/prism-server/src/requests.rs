//! Pending requests and request listeners
//!
//! The [`RequestManager`] holds at most one pending envelope per client and
//! owns every client's [`RequestListener`]. It never schedules work by
//! itself: an outer loop calls [`RequestManager::process_all`] to drain the
//! table.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;

use prism_core::{ClientName, RequestError};
use prism_protocol::{Envelope, EnvelopeReader};

use crate::client::BoxedReader;
use crate::dispatch::CommandTable;
use crate::events::{EventBus, ServerEvent};
use crate::listener::{ListenerEvent, ListenerId, RequestListener};

/// A request waiting to be processed
#[derive(Debug, Clone)]
pub struct PendingRequest {
    id: u64,
    envelope: Arc<Envelope>,
}

impl PendingRequest {
    /// Sequence number assigned when the request was queued
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The queued envelope
    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    /// Name of the client that sent it
    pub fn client_name(&self) -> &str {
        self.envelope.client_name()
    }
}

/// Result of one pass over the pending table
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Requests that were dispatched, successfully or not
    pub processed: usize,
    /// Requests whose processing returned an error
    pub failures: Vec<(Arc<Envelope>, RequestError)>,
}

impl ProcessReport {
    /// Whether every request in the pass succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pending request table and listener table
pub struct RequestManager {
    pending: DashMap<ClientName, PendingRequest>,
    listeners: DashMap<ClientName, RequestListener>,
    commands: Arc<CommandTable>,
    events: EventBus,
    outcomes: mpsc::Sender<ListenerEvent>,
    next_request_id: AtomicU64,
}

impl RequestManager {
    /// Create a manager dispatching through `commands`.
    ///
    /// Listeners it spawns report on `outcomes`.
    pub fn new(
        commands: Arc<CommandTable>,
        events: EventBus,
        outcomes: mpsc::Sender<ListenerEvent>,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            listeners: DashMap::new(),
            commands,
            events,
            outcomes,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Command table requests are dispatched through
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Queue a request.
    ///
    /// Fails with [`RequestError::TooManyRequests`] if the client already has
    /// one pending; the existing request is never overwritten.
    pub fn add_request(&self, envelope: Envelope) -> Result<Arc<Envelope>, RequestError> {
        let client = ClientName::new(envelope.client_name());

        let request = match self.pending.entry(client.clone()) {
            Entry::Occupied(_) => return Err(RequestError::TooManyRequests(client)),
            Entry::Vacant(entry) => {
                let request = PendingRequest {
                    id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
                    envelope: Arc::new(envelope),
                };
                entry.insert(request.clone());
                request
            }
        };

        tracing::trace!(
            client = %client,
            command = request.envelope.command_name(),
            request_id = request.id,
            "Request queued"
        );
        self.events.emit(ServerEvent::RequestAdded {
            envelope: Arc::clone(&request.envelope),
        });
        Ok(request.envelope)
    }

    /// Drop a client's pending request
    pub fn remove_request(&self, client: &str) -> Result<Arc<Envelope>, RequestError> {
        let (_, request) = self
            .pending
            .remove(client)
            .ok_or_else(|| RequestError::DoesNotExist(ClientName::new(client)))?;

        self.events.emit(ServerEvent::RequestRemoved {
            envelope: Arc::clone(&request.envelope),
        });
        Ok(request.envelope)
    }

    /// Snapshot of all pending requests, in no particular order
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.pending.iter().map(|r| r.value().clone()).collect()
    }

    /// A client's pending request, if any
    pub fn pending_for(&self, client: &str) -> Option<Arc<Envelope>> {
        self.pending.get(client).map(|r| Arc::clone(&r.envelope))
    }

    /// Number of pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch one pending request.
    ///
    /// The request leaves the pending table whatever happens to the command,
    /// including a panic or this future being dropped, and a
    /// [`ServerEvent::RequestProcessed`] follows. Fails with
    /// [`RequestError::DoesNotExist`] if the request was already removed.
    pub async fn process_one(&self, request: &PendingRequest) -> Result<(), RequestError> {
        let still_pending = self
            .pending
            .get(request.client_name())
            .is_some_and(|current| current.id == request.id);
        if !still_pending {
            return Err(RequestError::DoesNotExist(ClientName::new(
                request.client_name(),
            )));
        }

        let _guard = ProcessingGuard {
            manager: self,
            request,
        };

        let envelope = &request.envelope;
        match AssertUnwindSafe(self.commands.dispatch(envelope))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(RequestError::CommandPanicked {
                command: envelope.command_name().to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Process a snapshot of the pending table.
    ///
    /// A failing request does not stop the pass; its error is collected in
    /// the returned report.
    pub async fn process_all(&self) -> ProcessReport {
        let mut report = ProcessReport::default();

        for request in self.pending_requests() {
            report.processed += 1;
            if let Err(e) = self.process_one(&request).await {
                report
                    .failures
                    .push((Arc::clone(request.envelope()), e));
            }
        }

        report
    }

    /// Start a listener for `client` on `reader`.
    ///
    /// Fails with [`RequestError::ListenerAlreadyExists`] if the client
    /// already has one; `reader` is dropped in that case.
    pub fn attach_listener(
        &self,
        client: ClientName,
        reader: EnvelopeReader<BoxedReader>,
    ) -> Result<ListenerId, RequestError> {
        let id = match self.listeners.entry(client.clone()) {
            Entry::Occupied(_) => return Err(RequestError::ListenerAlreadyExists(client)),
            Entry::Vacant(entry) => {
                let listener = RequestListener::spawn(client.clone(), reader, self.outcomes.clone());
                let id = listener.id();
                entry.insert(listener);
                id
            }
        };

        self.events.emit(ServerEvent::ListenerAdded {
            client,
            listener: id,
        });
        Ok(id)
    }

    /// Cancel and discard a client's listener
    pub fn detach_listener(&self, client: &str) -> Option<ListenerId> {
        let (client, listener) = self.listeners.remove(client)?;
        listener.cancel();

        let id = listener.id();
        tracing::debug!(client = %client, listener = %id, "Request listener detached");
        self.events.emit(ServerEvent::ListenerRemoved {
            client,
            listener: id,
        });
        Some(id)
    }

    /// Whether `listener` is the one currently attached to `client`
    pub fn is_current_listener(&self, client: &str, listener: ListenerId) -> bool {
        self.listeners
            .get(client)
            .is_some_and(|current| current.id() == listener)
    }

    /// ID of the listener attached to `client`
    pub fn listener_id(&self, client: &str) -> Option<ListenerId> {
        self.listeners.get(client).map(|l| l.id())
    }

    /// Whether `client` has a listener attached
    pub fn has_listener(&self, client: &str) -> bool {
        self.listeners.contains_key(client)
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Removes a request from the pending table when processing ends
struct ProcessingGuard<'a> {
    manager: &'a RequestManager,
    request: &'a PendingRequest,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        let manager = self.manager;
        let id = self.request.id;

        // Only the exact entry that was processed; a newer request from the
        // same client stays queued
        let removed = manager
            .pending
            .remove_if(self.request.client_name(), |_, current| current.id == id);
        if let Some((_, request)) = removed {
            manager.events.emit(ServerEvent::RequestRemoved {
                envelope: request.envelope,
            });
        }

        manager.events.emit(ServerEvent::RequestProcessed {
            envelope: Arc::clone(&self.request.envelope),
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prism_core::{Command, CommandError};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl Command for Recorder {
        async fn execute(&self, _envelope: &Envelope, args: &[Value]) -> Result<(), CommandError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Command for Fail {
        async fn execute(&self, _envelope: &Envelope, _args: &[Value]) -> Result<(), CommandError> {
            Err(CommandError::Failed("boom".to_string()))
        }
    }

    struct Panic;

    #[async_trait]
    impl Command for Panic {
        async fn execute(&self, _envelope: &Envelope, _args: &[Value]) -> Result<(), CommandError> {
            panic!("command exploded");
        }
    }

    struct Hang;

    #[async_trait]
    impl Command for Hang {
        async fn execute(&self, _envelope: &Envelope, _args: &[Value]) -> Result<(), CommandError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Fixture {
        manager: RequestManager,
        recorder: Arc<Recorder>,
        events: broadcast::Receiver<ServerEvent>,
        _outcomes: mpsc::Receiver<ListenerEvent>,
    }

    fn fixture() -> Fixture {
        let recorder = Arc::new(Recorder::default());
        let mut table = CommandTable::new()
            .with_command("fail", Fail)
            .with_command("panic", Panic)
            .with_command("hang", Hang);
        table.register("info", recorder.clone());

        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let (tx, rx) = mpsc::channel(8);

        Fixture {
            manager: RequestManager::new(Arc::new(table), bus, tx),
            recorder,
            events,
            _outcomes: rx,
        }
    }

    fn envelope(client: &str, command: &str) -> Envelope {
        Envelope::new(client, command, vec![json!("hello")])
    }

    fn drain(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_second_request_is_rejected() {
        let f = fixture();
        f.manager.add_request(envelope("alice", "info")).unwrap();

        let err = f
            .manager
            .add_request(Envelope::new("alice", "info", vec![json!("second")]))
            .unwrap_err();
        assert!(matches!(err, RequestError::TooManyRequests(ref n) if n.as_str() == "alice"));

        // First request is untouched
        let pending = f.manager.pending_for("alice").unwrap();
        assert_eq!(pending.args(), &[json!("hello")]);
        assert_eq!(f.manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_then_add_again() {
        let f = fixture();
        f.manager.add_request(envelope("alice", "info")).unwrap();
        f.manager.remove_request("alice").unwrap();
        f.manager.add_request(envelope("alice", "info")).unwrap();
        assert_eq!(f.manager.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_request() {
        let f = fixture();
        let err = f.manager.remove_request("ghost").unwrap_err();
        assert!(matches!(err, RequestError::DoesNotExist(ref n) if n.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn test_distinct_clients_pending_together() {
        let f = fixture();
        f.manager.add_request(envelope("a", "info")).unwrap();
        f.manager.add_request(envelope("b", "info")).unwrap();

        assert_eq!(f.manager.pending_count(), 2);
        assert!(f.manager.pending_for("a").is_some());
        assert!(f.manager.pending_for("b").is_some());
    }

    #[tokio::test]
    async fn test_process_one_removes_exactly_once() {
        let mut f = fixture();
        f.manager.add_request(envelope("alice", "info")).unwrap();
        let request = f.manager.pending_requests().pop().unwrap();
        drain(&mut f.events);

        f.manager.process_one(&request).await.unwrap();

        assert_eq!(f.recorder.calls.lock().unwrap().as_slice(), &[vec![json!("hello")]]);
        assert!(f.manager.pending_for("alice").is_none());

        let events = drain(&mut f.events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ServerEvent::RequestRemoved { .. }));
        assert!(matches!(events[1], ServerEvent::RequestProcessed { .. }));

        // A second attempt finds nothing to process
        let err = f.manager.process_one(&request).await.unwrap_err();
        assert!(matches!(err, RequestError::DoesNotExist(_)));
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_still_removes_request() {
        let f = fixture();
        f.manager.add_request(envelope("alice", "fail")).unwrap();
        let request = f.manager.pending_requests().pop().unwrap();

        let err = f.manager.process_one(&request).await.unwrap_err();
        assert!(matches!(err, RequestError::CommandFailed { .. }));
        assert_eq!(f.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_command_is_contained() {
        let f = fixture();
        f.manager.add_request(envelope("alice", "panic")).unwrap();
        let request = f.manager.pending_requests().pop().unwrap();

        let err = f.manager.process_one(&request).await.unwrap_err();
        match err {
            RequestError::CommandPanicked { command, message } => {
                assert_eq!(command, "panic");
                assert_eq!(message, "command exploded");
            }
            other => panic!("Expected CommandPanicked, got {:?}", other),
        }
        assert_eq!(f.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_processing_still_removes_request() {
        let mut f = fixture();
        f.manager.add_request(envelope("alice", "hang")).unwrap();
        let request = f.manager.pending_requests().pop().unwrap();
        drain(&mut f.events);

        let result =
            tokio::time::timeout(Duration::from_millis(20), f.manager.process_one(&request)).await;
        assert!(result.is_err());

        assert_eq!(f.manager.pending_count(), 0);
        let events = drain(&mut f.events);
        assert!(matches!(events.last(), Some(ServerEvent::RequestProcessed { .. })));
    }

    #[tokio::test]
    async fn test_cleanup_spares_newer_request() {
        let f = fixture();
        f.manager.add_request(envelope("alice", "info")).unwrap();
        let stale = f.manager.pending_requests().pop().unwrap();

        f.manager.remove_request("alice").unwrap();
        f.manager.add_request(envelope("alice", "info")).unwrap();

        let err = f.manager.process_one(&stale).await.unwrap_err();
        assert!(matches!(err, RequestError::DoesNotExist(_)));
        assert!(f.manager.pending_for("alice").is_some());
        assert!(f.recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_all_collects_failures() {
        let f = fixture();
        f.manager.add_request(envelope("a", "info")).unwrap();
        f.manager.add_request(envelope("b", "fail")).unwrap();
        f.manager.add_request(envelope("c", "nonexistent")).unwrap();

        let report = f.manager.process_all().await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.is_clean());
        assert!(report.failures.iter().any(|(env, e)| env.client_name() == "c"
            && matches!(e, RequestError::UnknownCommand { command, .. } if command == "nonexistent")));
        assert_eq!(f.manager.pending_count(), 0);
        assert_eq!(f.recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_all_on_empty_table() {
        let f = fixture();
        let report = f.manager.process_all().await;
        assert_eq!(report.processed, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_attach_and_detach_listener() {
        let mut f = fixture();
        let (_peer, stream) = tokio::io::duplex(64);
        let reader = EnvelopeReader::new(Box::new(stream) as BoxedReader);

        let id = f.manager.attach_listener(ClientName::new("alice"), reader).unwrap();
        assert!(f.manager.is_current_listener("alice", id));

        let (_peer2, stream2) = tokio::io::duplex(64);
        let err = f
            .manager
            .attach_listener(
                ClientName::new("alice"),
                EnvelopeReader::new(Box::new(stream2) as BoxedReader),
            )
            .unwrap_err();
        assert!(matches!(err, RequestError::ListenerAlreadyExists(_)));
        assert_eq!(f.manager.listener_count(), 1);

        assert_eq!(f.manager.detach_listener("alice"), Some(id));
        assert!(!f.manager.is_current_listener("alice", id));
        assert!(!f.manager.has_listener("alice"));
        assert_eq!(f.manager.detach_listener("alice"), None);

        let events = drain(&mut f.events);
        assert!(matches!(events[0], ServerEvent::ListenerAdded { listener, .. } if listener == id));
        assert!(matches!(events[1], ServerEvent::ListenerRemoved { listener, .. } if listener == id));
    }
}
