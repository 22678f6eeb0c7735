//! Defaults and exit codes shared by the relay and the control plane.

use std::time::Duration;

/// Default bind host for all three listeners.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default TCP ingress port.
pub const DEFAULT_TCP_PORT: u16 = 8080;
/// Default UDP ingress port.
pub const DEFAULT_UDP_PORT: u16 = 8081;
/// Default WebSocket subscriber port.
pub const DEFAULT_WS_PORT: u16 = 8082;

/// How often blocked accept/receive calls wake up to re-check the stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// How long shutdown waits for each TCP/UDP listener before abandoning it.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1500);

/// Buffer capacity for TCP socket reads.
pub const READ_BUFFER_SIZE: usize = 1024;
/// Longest TCP line kept before it is cut into a message of its own.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
/// Receive buffer for UDP; large enough for any datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Process exit codes.
pub mod exit_code {
    /// Clean shutdown.
    pub const OK: i32 = 0;
    /// Fatal resource error (runtime dir, identity record, no listener bound).
    pub const FATAL: i32 = 1;
    /// Another live instance holds the singleton lock; nothing was started.
    pub const ALREADY_RUNNING: i32 = 3;
}
