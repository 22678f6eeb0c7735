use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A listener could not bind its socket.
    #[error("{listener} bind to {addr} failed: {source}")]
    Bind {
        /// Listener name (`tcp`, `udp`, `websocket`).
        listener: &'static str,
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The runtime directory could not be created.
    #[error("cannot create runtime directory {}: {source}", path.display())]
    RuntimeDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The singleton lock could not be inspected or written.
    #[error("singleton lock: {0}")]
    Lock(#[source] fanout_common::PidFileError),
    /// The process identity record could not be written after the lock was taken.
    #[error("process identity record: {0}")]
    Identity(#[source] fanout_common::PidFileError),
    /// None of the three listeners could bind.
    #[error("no listener could be started")]
    NoListeners,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
