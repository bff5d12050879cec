//! prism-cli: Client side of the Prism relay
//!
//! Provides [`PrismClient`] for programs that want to report to a running
//! relay, and the `prism` binary built on top of it.

pub mod client;
pub mod output;

pub use client::{parse_arg, PrismClient};
