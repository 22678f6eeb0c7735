use clap::Parser;
use fanout_common::types::{
    DEFAULT_JOIN_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT,
    DEFAULT_WS_PORT,
};
use fanout_common::RuntimePaths;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the relay daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "fanoutd")]
#[command(about = "TCP/UDP to WebSocket fan-out relay")]
#[command(version)]
pub struct Args {
    /// Address all three listeners bind to.
    #[arg(long, default_value = "0.0.0.0", env = "FANOUT_HOST")]
    pub host: IpAddr,
    /// TCP ingress port.
    #[arg(long, default_value_t = DEFAULT_TCP_PORT, env = "FANOUT_TCP_PORT")]
    pub tcp_port: u16,
    /// UDP ingress port.
    #[arg(long, default_value_t = DEFAULT_UDP_PORT, env = "FANOUT_UDP_PORT")]
    pub udp_port: u16,
    /// WebSocket subscriber port.
    #[arg(long, default_value_t = DEFAULT_WS_PORT, env = "FANOUT_WS_PORT")]
    pub ws_port: u16,
    /// Directory holding the lock, PID and activity log files.
    #[arg(long, default_value = "tmp", env = "FANOUT_RUNTIME_DIR")]
    pub runtime_dir: PathBuf,
    /// Stop-flag poll interval for the TCP and UDP listeners, in milliseconds.
    #[arg(long, default_value = "1000", env = "FANOUT_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
    /// How long shutdown waits for each TCP/UDP listener, in milliseconds.
    #[arg(long, default_value = "1500", env = "FANOUT_JOIN_TIMEOUT_MS")]
    pub join_timeout_ms: u64,
    /// Outbound frames buffered per subscriber before it is dropped as too slow.
    #[arg(long, default_value = "256", env = "FANOUT_SUBSCRIBER_QUEUE")]
    pub subscriber_queue: usize,
    /// Socket address for the metrics and health endpoint. Disabled if unset.
    #[arg(long, env = "FANOUT_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Tag written in every activity log line.
    #[arg(long, default_value = "fanout-server", env = "FANOUT_LOG_TAG")]
    pub log_tag: String,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address all three listeners bind to.
    pub host: IpAddr,
    /// TCP ingress port.
    pub tcp_port: u16,
    /// UDP ingress port.
    pub udp_port: u16,
    /// WebSocket subscriber port.
    pub ws_port: u16,
    /// Directory holding the lock, PID and activity log files.
    pub runtime_dir: PathBuf,
    /// Bounded wait used by the TCP and UDP listeners between stop-flag checks.
    pub poll_interval: Duration,
    /// Per-listener join timeout during shutdown.
    pub join_timeout: Duration,
    /// Per-subscriber outbound queue length.
    pub subscriber_queue: usize,
    /// Socket address for the metrics and health endpoint.
    pub metrics_addr: Option<SocketAddr>,
    /// Tag written in every activity log line.
    pub log_tag: String,
}

impl RelayConfig {
    /// TCP listener address.
    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    /// UDP listener address.
    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    /// WebSocket listener address.
    #[must_use]
    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.ws_port)
    }

    /// Runtime file layout.
    #[must_use]
    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths::new(&self.runtime_dir)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        let poll_ms = self.poll_interval.as_millis();
        if poll_ms < 10 {
            return Err("poll_interval must be at least 10 ms".to_string());
        }
        if poll_ms > 60_000 {
            return Err("poll_interval exceeds reasonable limit (60000 ms)".to_string());
        }

        let join_ms = self.join_timeout.as_millis();
        if join_ms == 0 {
            return Err("join_timeout must be greater than 0".to_string());
        }
        if join_ms > 600_000 {
            return Err("join_timeout exceeds reasonable limit (600000 ms)".to_string());
        }

        if self.subscriber_queue == 0 {
            return Err("subscriber_queue must be greater than 0".to_string());
        }
        if self.subscriber_queue > 65_536 {
            return Err("subscriber_queue exceeds reasonable limit (65536)".to_string());
        }

        // TCP and WebSocket both take a TCP port; UDP may share a number with either.
        if self.tcp_port != 0 && self.tcp_port == self.ws_port {
            return Err(format!(
                "tcp_port and ws_port must differ, both are {}",
                self.tcp_port
            ));
        }

        if self.runtime_dir.as_os_str().is_empty() {
            return Err("runtime_dir must not be empty".to_string());
        }
        if self.log_tag.trim().is_empty() {
            return Err("log_tag must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            ws_port: DEFAULT_WS_PORT,
            runtime_dir: PathBuf::from("tmp"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            subscriber_queue: 256,
            metrics_addr: None,
            log_tag: "fanout-server".to_string(),
        }
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            tcp_port: args.tcp_port,
            udp_port: args.udp_port,
            ws_port: args.ws_port,
            runtime_dir: args.runtime_dir,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            join_timeout: Duration::from_millis(args.join_timeout_ms),
            subscriber_queue: args.subscriber_queue,
            metrics_addr: args.metrics_addr,
            log_tag: args.log_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::field_reassign_with_default)]
    use super::*;

    #[test]
    fn default_config_passes() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn args_defaults_match_config_defaults() {
        let args = Args::parse_from(["fanoutd"]);
        let config = RelayConfig::from(args);
        let defaults = RelayConfig::default();
        assert_eq!(config.tcp_addr(), defaults.tcp_addr());
        assert_eq!(config.udp_addr(), defaults.udp_addr());
        assert_eq!(config.ws_addr(), defaults.ws_addr());
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.join_timeout, defaults.join_timeout);
        assert_eq!(config.runtime_dir, defaults.runtime_dir);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn args_override_ports_and_host() {
        let args = Args::parse_from([
            "fanoutd",
            "--host",
            "127.0.0.1",
            "--tcp-port",
            "9000",
            "--udp-port",
            "9001",
            "--ws-port",
            "9002",
            "--poll-interval-ms",
            "250",
        ]);
        let config = RelayConfig::from(args);
        assert_eq!(config.tcp_addr(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.udp_addr(), "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.ws_addr(), "127.0.0.1:9002".parse().unwrap());
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn paths_follow_runtime_dir() {
        let config = RelayConfig {
            runtime_dir: PathBuf::from("/srv/relay"),
            ..RelayConfig::default()
        };
        assert_eq!(
            config.paths().lock_file(),
            PathBuf::from("/srv/relay/message_server.lock")
        );
    }

    #[test]
    fn poll_interval_too_small() {
        let mut c = RelayConfig::default();
        c.poll_interval = Duration::from_millis(5);
        assert!(c.validate().unwrap_err().contains("poll_interval"));
    }

    #[test]
    fn poll_interval_too_large() {
        let mut c = RelayConfig::default();
        c.poll_interval = Duration::from_millis(60_001);
        assert!(c.validate().unwrap_err().contains("poll_interval"));
    }

    #[test]
    fn join_timeout_zero() {
        let mut c = RelayConfig::default();
        c.join_timeout = Duration::ZERO;
        assert!(c.validate().unwrap_err().contains("join_timeout"));
    }

    #[test]
    fn subscriber_queue_zero() {
        let mut c = RelayConfig::default();
        c.subscriber_queue = 0;
        assert!(c.validate().unwrap_err().contains("subscriber_queue"));
    }

    #[test]
    fn tcp_and_ws_ports_collide() {
        let mut c = RelayConfig::default();
        c.ws_port = c.tcp_port;
        assert!(c.validate().unwrap_err().contains("ws_port"));
    }

    #[test]
    fn udp_may_share_a_tcp_port_number() {
        let mut c = RelayConfig::default();
        c.udp_port = c.tcp_port;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn ephemeral_ports_are_allowed() {
        let mut c = RelayConfig::default();
        c.tcp_port = 0;
        c.udp_port = 0;
        c.ws_port = 0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_log_tag() {
        let mut c = RelayConfig::default();
        c.log_tag = "  ".to_string();
        assert!(c.validate().unwrap_err().contains("log_tag"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = RelayConfig::default();
        c.poll_interval = Duration::from_millis(10);
        c.join_timeout = Duration::from_millis(1);
        c.subscriber_queue = 1;
        assert!(c.validate().is_ok());

        c.poll_interval = Duration::from_millis(60_000);
        c.join_timeout = Duration::from_millis(600_000);
        c.subscriber_queue = 65_536;
        assert!(c.validate().is_ok());
    }
}
