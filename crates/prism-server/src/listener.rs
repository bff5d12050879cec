//! Per-client request listener
//!
//! Each registered client gets one listener task that reads envelopes from
//! the client's stream, one at a time, and reports what it read on an
//! outcome channel:
//!
//! - a decoded envelope is reported as [`ListenerOutcome::Valid`]
//! - end of stream or an undecodable frame is [`ListenerOutcome::Invalid`]
//! - a transport error is [`ListenerOutcome::Failed`], after which the task
//!   stops for good
//!
//! The listener never acts on these outcomes itself. Whoever owns the
//! receiving end decides what to do (enqueue the request, drop the client).
//!
//! Cancellation is cooperative: the token is checked around every read and
//! before every report, so once a listener has observed cancellation it
//! reports nothing further.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use prism_core::ClientName;
use prism_protocol::{Envelope, EnvelopeReader};

use crate::client::BoxedReader;

/// Unique identifier for a listener instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Lifecycle state of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    /// Read loop is running
    Listening = 0,
    /// Loop exited after a transport failure (or its consumer went away)
    Terminated = 1,
    /// Loop exited after cancellation
    Cancelled = 2,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenerState::Listening,
            1 => ListenerState::Terminated,
            _ => ListenerState::Cancelled,
        }
    }
}

/// What one read cycle produced
#[derive(Debug)]
pub enum ListenerOutcome {
    /// A decoded request, attributed to the listener's client
    Valid(Envelope),
    /// No usable data: the peer hung up or sent an undecodable frame
    Invalid { reason: String },
    /// The transport failed; the listener has stopped
    Failed(Arc<std::io::Error>),
}

/// An outcome tagged with the listener that produced it
#[derive(Debug)]
pub struct ListenerEvent {
    /// Listener that produced the outcome
    pub listener: ListenerId,
    /// Client the listener is bound to
    pub client: ClientName,
    /// The outcome itself
    pub outcome: ListenerOutcome,
}

/// Handle to a running listener task
pub struct RequestListener {
    id: ListenerId,
    client: ClientName,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl RequestListener {
    /// Start listening on `reader`, reporting to `outcomes`
    pub fn spawn(
        client: ClientName,
        reader: EnvelopeReader<BoxedReader>,
        outcomes: mpsc::Sender<ListenerEvent>,
    ) -> Self {
        let id = ListenerId::next();
        let cancel = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(ListenerState::Listening as u8));

        let task = tokio::spawn(listen(
            ListenerContext {
                id,
                client: client.clone(),
                cancel: cancel.clone(),
                outcomes,
            },
            reader,
            Arc::clone(&state),
        ));

        tracing::debug!(client = %client, listener = %id, "Request listener started");

        Self {
            id,
            client,
            cancel,
            state,
            task,
        }
    }

    /// Listener ID
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Client this listener reads for
    pub fn client(&self) -> &ClientName {
        &self.client
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the read loop to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the read loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the read loop to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(client = %self.client, listener = %self.id, "Listener task ended abnormally: {}", e);
        }
    }
}

impl fmt::Debug for RequestListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestListener")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("state", &self.state())
            .finish()
    }
}

struct ListenerContext {
    id: ListenerId,
    client: ClientName,
    cancel: CancellationToken,
    outcomes: mpsc::Sender<ListenerEvent>,
}

impl ListenerContext {
    /// Report an outcome. Returns false if the listener should stop.
    async fn report(&self, outcome: ListenerOutcome) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let event = ListenerEvent {
            listener: self.id,
            client: self.client.clone(),
            outcome,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = self.outcomes.send(event) => result.is_ok(),
        }
    }
}

async fn listen(
    ctx: ListenerContext,
    mut reader: EnvelopeReader<BoxedReader>,
    state: Arc<AtomicU8>,
) {
    let final_state = loop {
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break ListenerState::Cancelled,
            result = reader.read_envelope() => result,
        };

        if ctx.cancel.is_cancelled() {
            break ListenerState::Cancelled;
        }

        match result {
            Ok(Some(envelope)) => {
                // The connection decides who is speaking, not the payload
                let envelope = envelope.with_client_name(ctx.client.as_str());
                tracing::trace!(
                    client = %ctx.client,
                    command = envelope.command_name(),
                    "Request received"
                );
                if !ctx.report(ListenerOutcome::Valid(envelope)).await {
                    break stop_state(&ctx);
                }
            }
            Ok(None) => {
                tracing::debug!(client = %ctx.client, "Client stream closed");
                let reported = ctx
                    .report(ListenerOutcome::Invalid {
                        reason: "connection closed".to_string(),
                    })
                    .await;
                if !reported {
                    break stop_state(&ctx);
                }
                // Nothing more can arrive on a closed stream
                ctx.cancel.cancelled().await;
                break ListenerState::Cancelled;
            }
            Err(e) => match e.into_io() {
                Ok(io) => {
                    tracing::debug!(client = %ctx.client, "Client stream failed: {}", io);
                    let reported = ctx.report(ListenerOutcome::Failed(Arc::new(io))).await;
                    break if reported {
                        ListenerState::Terminated
                    } else {
                        stop_state(&ctx)
                    };
                }
                Err(other) => {
                    tracing::debug!(client = %ctx.client, "Undecodable frame: {}", other);
                    let reported = ctx
                        .report(ListenerOutcome::Invalid {
                            reason: other.to_string(),
                        })
                        .await;
                    if !reported {
                        break stop_state(&ctx);
                    }
                }
            },
        }
    };

    state.store(final_state as u8, Ordering::Release);
    tracing::debug!(client = %ctx.client, listener = %ctx.id, state = ?final_state, "Request listener stopped");
}

/// State to record when a report could not be delivered
fn stop_state(ctx: &ListenerContext) -> ListenerState {
    if ctx.cancel.is_cancelled() {
        ListenerState::Cancelled
    } else {
        ListenerState::Terminated
    }
}
