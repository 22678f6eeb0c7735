//! Broadcast envelope and system-event wire formats.
//!
//! Every TCP line or UDP datagram that reaches the relay is wrapped in an
//! [`Envelope`] and sent to WebSocket subscribers as one JSON text frame:
//!
//! ```json
//! {"type":"tcp","ip":"10.0.0.7","port":51234,"timestamp":"2026-01-01T12:00:00.250Z","data":"hello"}
//! ```

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Message sent to a subscriber right after its WebSocket handshake.
pub const CONNECTED_MESSAGE: &str = "Connected to the relay WebSocket server.";

/// Ingress transport an envelope originated from.
///
/// WebSocket traffic is never re-broadcast, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Line received on a TCP connection.
    Tcp,
    /// Datagram received on the UDP socket.
    Udp,
}

impl Transport {
    /// Lowercase wire name, also used as a log and metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical broadcast unit. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    transport: Transport,
    ip: IpAddr,
    port: u16,
    #[serde(with = "millis_rfc3339")]
    timestamp: DateTime<Utc>,
    data: String,
}

impl Envelope {
    /// Wrap `text` received from `source`, trimming it and stamping the
    /// current UTC time at millisecond precision.
    pub fn new(transport: Transport, source: SocketAddr, text: &str) -> Self {
        Self::at(transport, source, text, Utc::now())
    }

    /// Like [`Envelope::new`] with an explicit timestamp.
    pub fn at(transport: Transport, source: SocketAddr, text: &str, at: DateTime<Utc>) -> Self {
        Self {
            transport,
            ip: source.ip(),
            port: source.port(),
            timestamp: at.trunc_subsecs(3),
            data: text.trim().to_string(),
        }
    }

    /// Origin transport.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Sender address.
    #[must_use]
    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Receive time, truncated to milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Trimmed payload text.
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Serialize to the JSON text sent to subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error only if serde_json fails to encode the value.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Targeted notification sent only to the subscriber it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Always `"system"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event name, e.g. `"connected"`.
    pub event: String,
    /// Human-readable description.
    pub message: String,
    /// Identifier of the subscriber (its remote address).
    #[serde(rename = "clientId")]
    pub client_id: String,
}

impl SystemEvent {
    /// Connection confirmation for a freshly registered subscriber.
    pub fn connected(client: SocketAddr) -> Self {
        Self {
            kind: "system".to_string(),
            event: "connected".to_string(),
            message: CONNECTED_MESSAGE.to_string(),
            client_id: client.to_string(),
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error only if serde_json fails to encode the value.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decode received bytes as UTF-8, dropping undecodable sequences, and trim.
#[must_use]
pub fn decode_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text.trim().to_string()
}

/// Acknowledgement written back on the TCP connection after each line.
#[must_use]
pub fn tcp_ack(text: &str) -> String {
    format!("TCP Server ACK: '{text}' received.")
}

/// Acknowledgement datagram sent back to a UDP sender.
#[must_use]
pub fn udp_ack(text: &str) -> String {
    format!("UDP Server ACK: '{text}' received.")
}

/// Returns `true` if a TCP client asked to end its session.
#[must_use]
pub fn is_exit_command(text: &str) -> bool {
    text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit")
}

mod millis_rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
