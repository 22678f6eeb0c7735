//! Fan-out relay: text arriving over TCP or UDP is acknowledged to its sender
//! and broadcast as a JSON envelope to every connected WebSocket subscriber.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Timestamped activity log installed as the global `tracing` subscriber.
pub mod activity_log;
/// CLI argument parsing and relay configuration.
pub mod config;
mod connection;
/// Broadcast of envelopes to every registered subscriber.
pub mod dispatch;
/// Error types for relay operations.
pub mod error;
/// Singleton lock, process identity and coordinated startup/shutdown.
pub mod lifecycle;
/// Prometheus metrics and health endpoints.
pub mod metrics;
/// Guarded set of live WebSocket subscribers.
pub mod registry;
/// WebSocket accept loop.
pub mod server;
/// Stop flag and OS termination signals.
pub mod shutdown;
/// Line-oriented TCP ingress.
pub mod tcp;
/// Datagram ingress.
pub mod udp;

pub use config::RelayConfig;
pub use error::RelayError;
pub use lifecycle::{Controller, LifecycleState, RunningRelay, Startup, StopReason};
