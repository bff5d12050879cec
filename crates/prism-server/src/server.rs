//! Relay server
//!
//! Accepts TCP connections, performs the registration handshake, and
//! supervises the request listeners of registered clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use prism_core::config::ServerConfig;
use prism_core::{ClientError, ClientName, Logger, PrismError, RequestError};
use prism_protocol::EnvelopeReader;

use crate::client::{BoxedReader, ClientHandle};
use crate::coordinator::{Disconnected, StateCoordinator};
use crate::dispatch::CommandTable;
use crate::events::{EventBus, ServerEvent};
use crate::listener::{ListenerEvent, ListenerId, ListenerOutcome};
use crate::registry::ClientRegistry;
use crate::requests::{ProcessReport, RequestManager};

/// The Prism relay server
pub struct PrismServer {
    config: ServerConfig,
    events: EventBus,
    coordinator: StateCoordinator,
    logger: Arc<dyn Logger>,
    /// Taken by the supervisor when it starts
    outcomes: Mutex<Option<mpsc::Receiver<ListenerEvent>>>,
}

impl PrismServer {
    /// Create a server dispatching through `commands`
    pub fn new(config: ServerConfig, commands: CommandTable, logger: Arc<dyn Logger>) -> Arc<Self> {
        let events = EventBus::new(config.event_capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel(config.listener_channel_capacity.max(1));

        let clients = Arc::new(ClientRegistry::new(events.clone()));
        let requests = Arc::new(RequestManager::new(
            Arc::new(commands),
            events.clone(),
            outcome_tx,
        ));

        Arc::new(Self {
            config,
            events,
            coordinator: StateCoordinator::new(clients, requests),
            logger,
            outcomes: Mutex::new(Some(outcome_rx)),
        })
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Logger used for server and client messages
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// State coordinator
    pub fn coordinator(&self) -> &StateCoordinator {
        &self.coordinator
    }

    /// Client registry
    pub fn clients(&self) -> &ClientRegistry {
        &self.coordinator.clients
    }

    /// Request manager
    pub fn requests(&self) -> &RequestManager {
        &self.coordinator.requests
    }

    /// Names of all registered clients, sorted
    pub fn client_names(&self) -> Vec<ClientName> {
        self.coordinator.clients.names()
    }

    /// Start the task that reacts to listener outcomes.
    ///
    /// Valid requests are queued; anything else disconnects the client.
    /// Returns `None` if the supervisor was already started.
    pub fn spawn_supervisor(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut outcomes = self.outcomes.lock().ok()?.take()?;
        let server = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = outcomes.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                server.handle_listener_event(event).await;
            }
            tracing::debug!("Listener supervisor stopped");
        }))
    }

    async fn handle_listener_event(&self, event: ListenerEvent) {
        let ListenerEvent {
            listener,
            client,
            outcome,
        } = event;

        match outcome {
            ListenerOutcome::Valid(envelope) => {
                if let Err(e) = self.coordinator.enqueue(listener, envelope).await {
                    self.logger.server_warning(&e.to_string());
                }
            }
            ListenerOutcome::Invalid { reason } => {
                tracing::debug!(client = %client, listener = %listener, "Invalid request: {}", reason);
                self.disconnect_from_listener(&client, listener).await;
            }
            ListenerOutcome::Failed(error) => {
                if self
                    .coordinator
                    .requests
                    .is_current_listener(client.as_str(), listener)
                {
                    self.events.emit(ServerEvent::ListenerFailed {
                        client: client.clone(),
                        listener,
                        error,
                    });
                }
                self.disconnect_from_listener(&client, listener).await;
            }
        }
    }

    async fn disconnect_from_listener(&self, client: &ClientName, listener: ListenerId) {
        match self
            .coordinator
            .disconnect_listener(client.as_str(), listener)
            .await
        {
            Some(Ok(disconnected)) => {
                tracing::info!(client = %client, "Client disconnected");
                if let Some(envelope) = disconnected.dropped_request {
                    tracing::debug!(
                        client = %client,
                        command = envelope.command_name(),
                        "Dropped pending request of disconnected client"
                    );
                }
            }
            Some(Err(e)) => self.logger.server_warning(&e.to_string()),
            None => {
                tracing::trace!(client = %client, listener = %listener, "Ignoring outcome of detached listener");
            }
        }
    }

    /// Perform the registration handshake on a fresh connection.
    ///
    /// Reads exactly one envelope; its client name becomes the connection's
    /// identity. On success the client is registered and its listener
    /// started. On failure the connection is dropped and nothing is
    /// registered.
    pub async fn register_connection<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> Result<Arc<ClientHandle>, PrismError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.events.emit(ServerEvent::RegistrationStarted { peer });

        let (read, write) = tokio::io::split(stream);
        let mut reader = EnvelopeReader::new(Box::new(read) as BoxedReader)
            .with_max_frame_length(self.config.max_frame_length);

        let registration = match reader.read_envelope().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                return Err(
                    ClientError::invalid_registration("connection closed before registration")
                        .into(),
                )
            }
            Err(e) => {
                return Err(ClientError::InvalidRegistrationData {
                    reason: "registration payload could not be decoded".to_string(),
                    source: Some(e),
                }
                .into())
            }
        };

        if registration.client_name().is_empty() {
            return Err(
                ClientError::invalid_registration("registration payload has no client name").into(),
            );
        }

        let name = ClientName::new(registration.client_name());
        let handle = ClientHandle::new(name.clone(), peer, Box::new(write));
        let handle = self.coordinator.atomic_register(handle, reader).await?;

        self.events.emit(ServerEvent::RegistrationFinished { client: name });
        Ok(handle)
    }

    /// Accept connections on `listener` until `cancel` fires
    pub async fn serve(self: &Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Prism server listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Accept loop shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr, cancel.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn handle_connection(self: &Arc<Self>, socket: TcpStream, peer_addr: SocketAddr, cancel: CancellationToken) {
        tracing::debug!("New connection from {}", peer_addr);

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Registration cancelled for {}", peer_addr);
                    return;
                }
                result = server.register_connection(socket, Some(peer_addr)) => result
            };

            match result {
                Ok(handle) => {
                    tracing::debug!(client = %handle.name(), "Connection from {} registered", peer_addr);
                }
                Err(e) => {
                    server
                        .logger
                        .server_error(&format!("Registration from {} failed: {}", peer_addr, e));
                }
            }
        });
    }

    /// Disconnect a client by name
    pub async fn disconnect_client(&self, client: &str) -> Result<Disconnected, ClientError> {
        self.coordinator.atomic_disconnect(client).await
    }

    /// Disconnect every client, returning how many were connected
    pub async fn disconnect_all(&self) -> usize {
        self.coordinator.disconnect_all().await.len()
    }

    /// One processing pass over the pending requests
    pub async fn process_requests(&self) -> ProcessReport {
        self.coordinator.requests.process_all().await
    }

    /// Run processing passes every `interval` until `cancel` fires.
    ///
    /// Failures are reported through the logger and never stop the loop.
    pub async fn drive_requests(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.process_requests().await;
            for (envelope, error) in &report.failures {
                match error {
                    // Lost a race with a disconnect; nothing to report
                    RequestError::DoesNotExist(_) => {
                        tracing::debug!(client = envelope.client_name(), "Request vanished before processing");
                    }
                    _ => self.logger.server_error(&error.to_string()),
                }
            }
        }
    }
}

impl std::fmt::Debug for PrismServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrismServer")
            .field("bind_address", &self.config.bind_address)
            .field("clients", &self.coordinator.clients.len())
            .field("pending", &self.coordinator.requests.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::TracingLogger;
    use prism_protocol::Envelope;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf};
    use tokio::time::timeout;

    /// Yields `data` once, then fails every read with a connection reset
    struct ResettingStream {
        data: Option<Vec<u8>>,
    }

    impl AsyncRead for ResettingStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))),
            }
        }
    }

    impl AsyncWrite for ResettingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn server() -> Arc<PrismServer> {
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
        PrismServer::new(
            ServerConfig::default(),
            CommandTable::with_builtins(Arc::clone(&logger)),
            logger,
        )
    }

    async fn send(stream: &mut DuplexStream, envelope: &Envelope) {
        stream
            .write_all(envelope.to_frame().unwrap().as_bytes())
            .await
            .unwrap();
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_registration_handshake() {
        let server = server();
        let mut events = server.subscribe();
        let (local, mut remote) = tokio::io::duplex(1024);

        send(&mut remote, &Envelope::registration("alice")).await;
        let handle = server.register_connection(local, None).await.unwrap();

        assert_eq!(handle.name().as_str(), "alice");
        assert_eq!(server.client_names(), vec![ClientName::new("alice")]);
        assert!(server.requests().has_listener("alice"));

        assert!(matches!(events.recv().await, Ok(ServerEvent::RegistrationStarted { .. })));
        assert!(matches!(events.recv().await, Ok(ServerEvent::ClientAdded { .. })));
        assert!(matches!(events.recv().await, Ok(ServerEvent::ListenerAdded { .. })));
        assert!(matches!(events.recv().await, Ok(ServerEvent::RegistrationFinished { .. })));
    }

    #[tokio::test]
    async fn test_registration_without_name_is_rejected() {
        let server = server();
        let (local, mut remote) = tokio::io::duplex(1024);

        remote
            .write_all(b"{\"CommandName\":\"info\",\"Args\":[]}\n")
            .await
            .unwrap();
        let err = server.register_connection(local, None).await.unwrap_err();

        assert!(matches!(
            err,
            PrismError::Client(ClientError::InvalidRegistrationData { .. })
        ));
        assert!(server.clients().is_empty());
    }

    #[tokio::test]
    async fn test_registration_with_garbage_is_rejected() {
        let server = server();
        let (local, mut remote) = tokio::io::duplex(1024);

        remote.write_all(b"hello there\n").await.unwrap();
        let err = server.register_connection(local, None).await.unwrap_err();

        match err {
            PrismError::Client(ClientError::InvalidRegistrationData { source, .. }) => {
                assert!(source.is_some());
            }
            other => panic!("Expected InvalidRegistrationData, got {:?}", other),
        }
        assert!(server.clients().is_empty());
    }

    #[tokio::test]
    async fn test_registration_on_closed_stream_is_rejected() {
        let server = server();
        let (local, remote) = tokio::io::duplex(1024);
        drop(remote);

        let err = server.register_connection(local, None).await.unwrap_err();
        assert!(matches!(
            err,
            PrismError::Client(ClientError::InvalidRegistrationData { source: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_supervisor_queues_and_disconnects() {
        let server = server();
        let cancel = CancellationToken::new();
        let supervisor = server.spawn_supervisor(cancel.clone()).unwrap();
        assert!(server.spawn_supervisor(cancel.clone()).is_none());

        let (local, mut remote) = tokio::io::duplex(1024);
        send(&mut remote, &Envelope::registration("alice")).await;
        server.register_connection(local, None).await.unwrap();

        send(
            &mut remote,
            &Envelope::new("alice", "info", vec![serde_json::json!("hello")]),
        )
        .await;
        wait_for(|| server.requests().pending_count() == 1).await;

        let report = server.process_requests().await;
        assert_eq!(report.processed, 1);
        assert!(report.is_clean());
        assert_eq!(server.requests().pending_count(), 0);

        // Hanging up removes the client
        drop(remote);
        wait_for(|| server.clients().is_empty()).await;
        assert!(!server.requests().has_listener("alice"));

        cancel.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_failure_removes_client() {
        let server = server();
        let mut events = server.subscribe();
        let cancel = CancellationToken::new();
        let supervisor = server.spawn_supervisor(cancel.clone()).unwrap();

        let mut payload = Envelope::registration("frank").to_frame().unwrap();
        payload.push_str(
            &Envelope::new("frank", "info", vec![serde_json::json!("last words")])
                .to_frame()
                .unwrap(),
        );
        let stream = ResettingStream {
            data: Some(payload.into_bytes()),
        };
        server.register_connection(stream, None).await.unwrap();

        wait_for(|| {
            server.clients().is_empty()
                && server.requests().pending_count() == 0
                && server.requests().listener_count() == 0
        })
        .await;

        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::ListenerFailed { client, error, .. } = event {
                failures.push((client, error.kind()));
            }
        }
        assert_eq!(
            failures,
            vec![(ClientName::new("frank"), std::io::ErrorKind::ConnectionReset)]
        );

        cancel.cancel();
        supervisor.await.unwrap();
    }
}
