use clap::{Parser, Subcommand};
use fanout_common::RuntimePaths;
use std::path::PathBuf;
use std::time::Duration;

/// File name of the relay executable looked up next to `fanoutctl`.
pub const RELAY_BIN_NAME: &str = "fanoutd";

/// CLI interface for the control plane.
#[derive(Parser, Debug)]
#[command(name = "fanoutctl", about = "Control a fanout relay instance")]
#[command(version)]
pub struct Cli {
    /// Operation to perform.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime directory shared with the relay (lock, PID and activity log).
    #[arg(long, global = true, default_value = "tmp", env = "FANOUT_RUNTIME_DIR")]
    pub runtime_dir: PathBuf,

    /// Relay executable. Defaults to `fanoutd` next to this binary, then `PATH`.
    #[arg(long, global = true, env = "FANOUT_RELAY_BIN")]
    pub relay_bin: Option<PathBuf>,

    /// Only treat a live PID as the relay if its process name matches.
    #[arg(long, global = true, env = "FANOUT_EXPECT_NAME")]
    pub expect_name: Option<String>,

    /// How long `start` waits for the relay to report running, in milliseconds.
    #[arg(long, global = true, default_value = "2500")]
    pub startup_grace_ms: u64,

    /// How long `stop` waits after SIGTERM before sending SIGKILL, in milliseconds.
    #[arg(long, global = true, default_value = "5000")]
    pub stop_timeout_ms: u64,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Launch the relay detached, unless it is already running.
    Start {
        /// Extra arguments passed to the relay after `--`.
        #[arg(last = true)]
        relay_args: Vec<String>,
    },
    /// Terminate the running relay.
    Stop,
    /// Report whether the relay is running.
    Status,
}

/// Settings for a [`crate::Supervisor`].
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Runtime directory layout.
    pub paths: RuntimePaths,
    /// Relay executable.
    pub relay_bin: PathBuf,
    /// Expected process name of the relay, if checked.
    pub expect_name: Option<String>,
    /// Wait for the relay to come up after launch.
    pub startup_grace: Duration,
    /// Wait between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
}

impl ControlConfig {
    /// Defaults for `runtime_dir`.
    #[must_use]
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: RuntimePaths::new(runtime_dir),
            relay_bin: default_relay_bin(),
            expect_name: None,
            startup_grace: Duration::from_millis(2500),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.paths.dir().as_os_str().is_empty() {
            return Err("runtime_dir must not be empty".into());
        }
        if self.startup_grace.is_zero() {
            return Err("startup_grace_ms must be > 0".into());
        }
        if self.stop_timeout.is_zero() {
            return Err("stop_timeout_ms must be > 0".into());
        }
        if self.expect_name.as_deref().is_some_and(str::is_empty) {
            return Err("expect_name must not be empty when set".into());
        }
        Ok(())
    }
}

impl From<&Cli> for ControlConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            paths: RuntimePaths::new(&cli.runtime_dir),
            relay_bin: cli.relay_bin.clone().unwrap_or_else(default_relay_bin),
            expect_name: cli.expect_name.clone(),
            startup_grace: Duration::from_millis(cli.startup_grace_ms),
            stop_timeout: Duration::from_millis(cli.stop_timeout_ms),
        }
    }
}

/// `fanoutd` beside the running executable if present, else the bare name.
fn default_relay_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(RELAY_BIN_NAME)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(RELAY_BIN_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_with_global_flags() {
        let cli = Cli::try_parse_from([
            "fanoutctl",
            "status",
            "--runtime-dir",
            "/var/run/fanout",
            "--expect-name",
            "fanoutd",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Status);

        let config = ControlConfig::from(&cli);
        assert_eq!(config.paths.dir(), std::path::Path::new("/var/run/fanout"));
        assert_eq!(config.expect_name.as_deref(), Some("fanoutd"));
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn start_forwards_trailing_args() {
        let cli = Cli::try_parse_from(["fanoutctl", "start", "--", "--tcp-port", "9000"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Start {
                relay_args: vec!["--tcp-port".into(), "9000".into()]
            }
        );
    }

    #[test]
    fn explicit_relay_bin_wins() {
        let cli = Cli::try_parse_from(["fanoutctl", "stop", "--relay-bin", "/opt/fanoutd"]).unwrap();
        assert_eq!(
            ControlConfig::from(&cli).relay_bin,
            PathBuf::from("/opt/fanoutd")
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ControlConfig::new("tmp").validate().is_ok());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut config = ControlConfig::new("tmp");
        config.stop_timeout = Duration::ZERO;
        assert!(config.validate().unwrap_err().contains("stop_timeout"));

        let mut config = ControlConfig::new("tmp");
        config.startup_grace = Duration::ZERO;
        assert!(config.validate().unwrap_err().contains("startup_grace"));
    }

    #[test]
    fn empty_expected_name_is_rejected() {
        let mut config = ControlConfig::new("tmp");
        config.expect_name = Some(String::new());
        assert!(config.validate().is_err());
    }
}
