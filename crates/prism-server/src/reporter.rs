//! Console reporting of lifecycle events

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use prism_core::Logger;

use crate::events::ServerEvent;

/// Severity of a reported line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Message,
    Warning,
    Error,
}

/// Render an event as a server log line.
///
/// Returns `None` for events that are not reported (request traffic and
/// listener bookkeeping).
pub fn describe(event: &ServerEvent) -> Option<(Severity, String)> {
    let line = match event {
        ServerEvent::RegistrationStarted { .. } => (
            Severity::Message,
            "New client connected, waiting for registration...".to_string(),
        ),
        ServerEvent::RegistrationFinished { client } => {
            (Severity::Message, format!("Client registered as {}", client))
        }
        ServerEvent::ClientAdded { client } => (Severity::Message, format!("Added client {}", client)),
        ServerEvent::ClientRemoved { client } => {
            (Severity::Message, format!("Removed client {}", client))
        }
        ServerEvent::ListenerFailed { client, error, .. } => (
            Severity::Error,
            format!("Request listener for {} failed: {}", client, error),
        ),
        ServerEvent::RequestAdded { .. }
        | ServerEvent::RequestRemoved { .. }
        | ServerEvent::RequestProcessed { .. }
        | ServerEvent::ListenerAdded { .. }
        | ServerEvent::ListenerRemoved { .. } => return None,
    };
    Some(line)
}

/// Report events from `events` through `logger` until `cancel` fires or the
/// bus is dropped
pub async fn run_reporter(
    mut events: broadcast::Receiver<ServerEvent>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                if let Some((severity, text)) = describe(&event) {
                    match severity {
                        Severity::Message => logger.server_message(&text),
                        Severity::Warning => logger.server_warning(&text),
                        Severity::Error => logger.server_error(&text),
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                logger.server_warning(&format!("Event reporter fell behind, skipped {} events", skipped));
            }
            Err(RecvError::Closed) => break,
        }
    }
}
