//! prism-server: Local relay for debug messages
//!
//! Client processes connect over TCP, register under a unique name and send
//! one command request at a time. The server keeps a registry of connected
//! clients, runs one request listener per client, queues at most one
//! pending request per client and dispatches queued requests to registered
//! command handlers when its owner drives a processing pass.

pub mod client;
pub mod commands;
pub mod coordinator;
pub mod dispatch;
pub mod events;
pub mod listener;
pub mod registry;
pub mod reporter;
pub mod requests;
pub mod server;

pub use client::ClientHandle;
pub use coordinator::{Disconnected, StateCoordinator};
pub use dispatch::CommandTable;
pub use events::{EventBus, ServerEvent};
pub use listener::{ListenerId, ListenerState, RequestListener};
pub use registry::ClientRegistry;
pub use requests::{PendingRequest, ProcessReport, RequestManager};
pub use server::PrismServer;
