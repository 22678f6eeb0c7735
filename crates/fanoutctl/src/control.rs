//! Start, stop and status against the relay's runtime records.
//!
//! The relay owns its lock and identity files; the supervisor only reads
//! them, signals the recorded PID, and clears records whose process is gone.

use crate::config::ControlConfig;
use crate::error::ControlError;
use fanout_common::{process, PidFileError, PidRecord};
use serde::Serialize;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Activity log lines quoted when a launch fails.
const LOG_TAIL_LINES: usize = 5;

/// Outcome category of a control operation.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    /// The relay is alive.
    Running,
    /// No relay is alive, or it was just stopped.
    Stopped,
    /// `start` launched a relay that is now running.
    Started,
    /// `start` found a relay already running.
    AlreadyRunning,
    /// `stop` found only records of a dead relay.
    AlreadyStopped,
    /// `stop` found no relay PID at all.
    NotRunning,
    /// A recorded PID is alive but is not the relay.
    ErrorStalePid,
    /// A launched relay did not come up within the grace period.
    ErrorStarting,
    /// Any other failure.
    Error,
}

impl ControlStatus {
    /// Whether the operation failed.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::ErrorStalePid | Self::ErrorStarting | Self::Error)
    }
}

/// One JSON line printed per operation.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ControlResult {
    /// Outcome category.
    pub status: ControlStatus,
    /// PID involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Human readable detail.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ControlResult {
    fn new(status: ControlStatus, pid: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            status,
            pid,
            message: message.into(),
        }
    }

    /// A result reporting `error`.
    #[must_use]
    pub fn error(error: &ControlError) -> Self {
        Self::new(ControlStatus::Error, None, error.to_string())
    }

    /// Render as a single JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"status":"error","message":"unserializable result for {:?}"}}"#, self.status)
        })
    }
}

/// Drives one relay instance through its runtime records.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: ControlConfig,
    identity: PidRecord,
    lock: PidRecord,
}

impl Supervisor {
    /// Supervisor for the relay described by `config`.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        let identity = PidRecord::new(config.paths.pid_file());
        let lock = PidRecord::new(config.paths.lock_file());
        Self {
            config,
            identity,
            lock,
        }
    }

    /// Inspect the identity record, then the lock, clearing records whose
    /// process is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if a record exists but cannot be read or removed.
    pub fn status(&self) -> Result<ControlResult, ControlError> {
        debug!(
            "checking status, identity {}, lock {}",
            self.identity.path().display(),
            self.lock.path().display()
        );

        match self.identity.read() {
            Ok(Some(pid)) if process::is_alive(pid) => {
                if self.is_relay(pid) {
                    return Ok(ControlResult::new(ControlStatus::Running, Some(pid), ""));
                }
                warn!("PID {pid} is alive but does not look like the relay");
                if !self.lock.exists() {
                    self.clear_records("identity names a foreign process and no lock exists")?;
                }
                return Ok(ControlResult::new(
                    ControlStatus::ErrorStalePid,
                    Some(pid),
                    "active PID does not appear to be the relay process",
                ));
            }
            Ok(Some(pid)) => {
                self.clear_records(&format!("PID {pid} from identity record is not running"))?;
                return Ok(ControlResult::new(ControlStatus::Stopped, None, ""));
            }
            Ok(None) => {}
            Err(PidFileError::Malformed { content, .. }) => {
                self.clear_records(&format!("unreadable identity record {content:?}"))?;
                return Ok(ControlResult::new(ControlStatus::Stopped, None, ""));
            }
            Err(e) => return Err(e.into()),
        }

        match self.lock.read() {
            Ok(Some(pid)) if process::is_alive(pid) => {
                return Ok(ControlResult::new(
                    ControlStatus::Running,
                    Some(pid),
                    "relay running according to the lock; identity record missing",
                ));
            }
            Ok(Some(pid)) => self.clear_records(&format!("stale lock held by PID {pid}"))?,
            Ok(None) => {}
            Err(PidFileError::Malformed { content, .. }) => {
                self.clear_records(&format!("unreadable lock {content:?}"))?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(ControlResult::new(ControlStatus::Stopped, None, ""))
    }

    /// Launch the relay detached unless one is running, then wait for it to
    /// report running.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime directory cannot be created or a
    /// record cannot be read or removed. A failed launch is reported as
    /// [`ControlStatus::ErrorStarting`].
    pub async fn start(&self, relay_args: &[String]) -> Result<ControlResult, ControlError> {
        let paths = &self.config.paths;
        paths
            .ensure_dir()
            .map_err(|source| ControlError::RuntimeDir {
                path: paths.dir().to_path_buf(),
                source,
            })?;

        let current = self.status()?;
        if current.status == ControlStatus::Running {
            return Ok(ControlResult::new(
                ControlStatus::AlreadyRunning,
                current.pid,
                "relay is already running",
            ));
        }

        if self.lock.exists() {
            self.clear_records("lock still present before launch")?;
            // A relay may have come up between the first check and the clear.
            let current = self.status()?;
            if current.status == ControlStatus::Running {
                return Ok(ControlResult::new(
                    ControlStatus::AlreadyRunning,
                    current.pid,
                    "relay came up while clearing a leftover lock",
                ));
            }
        }

        let mut child = match self.spawn_relay(relay_args) {
            Ok(child) => child,
            Err(e) => {
                warn!("{e}");
                return Ok(ControlResult::new(ControlStatus::ErrorStarting, None, e.to_string()));
            }
        };
        info!("launched {} as PID {}", self.config.relay_bin.display(), child.id());

        let deadline = Instant::now() + self.config.startup_grace;
        while Instant::now() < deadline {
            sleep(POLL_INTERVAL).await;

            let current = self.status()?;
            if current.status == ControlStatus::Running {
                let status = if current.pid == Some(child.id()) {
                    ControlStatus::Started
                } else {
                    // Lost a race with another launcher.
                    ControlStatus::AlreadyRunning
                };
                return Ok(ControlResult::new(status, current.pid, "relay reported running"));
            }

            if let Ok(Some(exit)) = child.try_wait() {
                warn!("relay exited during startup: {exit}");
                break;
            }
        }

        Ok(ControlResult::new(
            ControlStatus::ErrorStarting,
            None,
            format!("relay failed to start. {}", self.activity_tail()),
        ))
    }

    /// Send SIGTERM to the recorded relay, escalate to SIGKILL after the stop
    /// timeout, then clear the records.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be removed.
    pub async fn stop(&self) -> Result<ControlResult, ControlError> {
        let Some(pid) = self.recorded_pid() else {
            self.clear_records("no relay PID recorded")?;
            return Ok(ControlResult::new(
                ControlStatus::NotRunning,
                None,
                "relay not running (no valid PID)",
            ));
        };

        if !process::is_alive(pid) {
            self.clear_records(&format!("PID {pid} is not running"))?;
            return Ok(ControlResult::new(
                ControlStatus::AlreadyStopped,
                Some(pid),
                "relay was already stopped",
            ));
        }

        if !self.is_relay(pid) {
            self.identity.remove()?;
            return Ok(ControlResult::new(
                ControlStatus::ErrorStalePid,
                Some(pid),
                "PID is alive but is not the relay",
            ));
        }

        info!("sending SIGTERM to PID {pid}");
        if !process::terminate(pid) {
            return Ok(ControlResult::new(
                ControlStatus::Error,
                Some(pid),
                "failed to signal the relay",
            ));
        }

        if self.wait_for_exit(pid, self.config.stop_timeout).await {
            info!("PID {pid} terminated gracefully");
        } else {
            warn!("PID {pid} ignored SIGTERM for {:?}, sending SIGKILL", self.config.stop_timeout);
            if !process::kill(pid) {
                warn!("SIGKILL to PID {pid} failed");
            }
            self.wait_for_exit(pid, Duration::from_secs(1)).await;
        }

        self.clear_records("relay stopped")?;
        Ok(ControlResult::new(
            ControlStatus::Stopped,
            Some(pid),
            "relay stop command issued",
        ))
    }

    fn spawn_relay(&self, relay_args: &[String]) -> Result<std::process::Child, ControlError> {
        let mut command = Command::new(&self.config.relay_bin);
        command
            .arg("--runtime-dir")
            .arg(self.config.paths.dir())
            .args(relay_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().map_err(|source| ControlError::Spawn {
            bin: self.config.relay_bin.clone(),
            source,
        })
    }

    /// Identity first, lock as fallback; unreadable records count as absent.
    fn recorded_pid(&self) -> Option<u32> {
        let read = |record: &PidRecord| match record.read() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("{e}");
                None
            }
        };
        read(&self.identity).or_else(|| read(&self.lock))
    }

    fn is_relay(&self, pid: u32) -> bool {
        match &self.config.expect_name {
            None => true,
            Some(expected) => process::process_name(pid).is_some_and(|name| name == *expected),
        }
    }

    async fn wait_for_exit(&self, pid: u32, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while process::is_alive(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
        true
    }

    fn clear_records(&self, reason: &str) -> Result<(), ControlError> {
        info!("clearing runtime records: {reason}");
        self.identity.remove()?;
        self.lock.remove()?;
        Ok(())
    }

    fn activity_tail(&self) -> String {
        let path = self.config.paths.activity_log();
        match std::fs::read_to_string(&path) {
            Ok(log) => {
                let lines: Vec<&str> = log.lines().collect();
                let tail = &lines[lines.len().saturating_sub(LOG_TAIL_LINES)..];
                format!("Last activity: {}", tail.join(" | "))
            }
            Err(e) => format!("Could not read {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DEAD_PID: u32 = 4_194_305;

    struct Fixture {
        dir: PathBuf,
        supervisor: Supervisor,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(|_| {})
        }

        fn with(tweak: impl FnOnce(&mut ControlConfig)) -> Self {
            let dir = std::env::temp_dir().join(format!("fanoutctl-{}", rand::random::<u64>()));
            std::fs::create_dir_all(&dir).unwrap();
            let mut config = ControlConfig::new(&dir);
            config.startup_grace = Duration::from_millis(300);
            config.stop_timeout = Duration::from_secs(2);
            tweak(&mut config);
            Self {
                dir,
                supervisor: Supervisor::new(config),
            }
        }

        fn identity(&self) -> &PidRecord {
            &self.supervisor.identity
        }

        fn lock(&self) -> &PidRecord {
            &self.supervisor.lock
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn spawn_sleeper() -> std::process::Child {
        std::process::Command::new("sleep").arg("30").spawn().unwrap()
    }

    #[test]
    fn status_of_empty_dir_is_stopped() {
        let fx = Fixture::new();
        let result = fx.supervisor.status().unwrap();
        assert_eq!(result.status, ControlStatus::Stopped);
        assert_eq!(result.pid, None);
    }

    #[test]
    fn status_clears_stale_records() {
        let fx = Fixture::new();
        fx.identity().write(DEAD_PID).unwrap();
        fx.lock().write(DEAD_PID).unwrap();

        assert_eq!(fx.supervisor.status().unwrap().status, ControlStatus::Stopped);
        assert!(!fx.identity().exists());
        assert!(!fx.lock().exists());
    }

    #[test]
    fn status_clears_malformed_identity() {
        let fx = Fixture::new();
        std::fs::write(fx.identity().path(), "garbage").unwrap();
        assert_eq!(fx.supervisor.status().unwrap().status, ControlStatus::Stopped);
        assert!(!fx.identity().exists());
    }

    #[test]
    fn status_reports_live_identity() {
        let fx = Fixture::new();
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();

        let result = fx.supervisor.status().unwrap();
        assert_eq!(result.status, ControlStatus::Running);
        assert_eq!(result.pid, Some(child.id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn status_falls_back_to_the_lock() {
        let fx = Fixture::new();
        let mut child = spawn_sleeper();
        fx.lock().write(child.id()).unwrap();

        let result = fx.supervisor.status().unwrap();
        assert_eq!(result.status, ControlStatus::Running);
        assert!(result.message.contains("lock"));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn status_flags_a_foreign_process() {
        let fx = Fixture::with(|c| c.expect_name = Some("fanoutd-not-sleep".into()));
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();

        let result = fx.supervisor.status().unwrap();
        assert_eq!(result.status, ControlStatus::ErrorStalePid);
        assert!(result.status.is_error());
        // No lock, so the identity record is cleared.
        assert!(!fx.identity().exists());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn stop_without_records_is_not_running() {
        let fx = Fixture::new();
        let result = fx.supervisor.stop().await.unwrap();
        assert_eq!(result.status, ControlStatus::NotRunning);
    }

    #[tokio::test]
    async fn stop_with_dead_pid_is_already_stopped() {
        let fx = Fixture::new();
        fx.identity().write(DEAD_PID).unwrap();
        fx.lock().write(DEAD_PID).unwrap();

        let result = fx.supervisor.stop().await.unwrap();
        assert_eq!(result.status, ControlStatus::AlreadyStopped);
        assert!(!fx.identity().exists());
        assert!(!fx.lock().exists());
    }

    #[tokio::test]
    async fn stop_terminates_the_recorded_process() {
        let fx = Fixture::new();
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();
        fx.lock().write(child.id()).unwrap();

        let result = fx.supervisor.stop().await.unwrap();
        assert_eq!(result.status, ControlStatus::Stopped);
        assert_eq!(result.pid, Some(child.id()));
        assert!(!fx.identity().exists());
        assert!(!fx.lock().exists());

        let exit = child.wait().unwrap();
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn stop_refuses_a_foreign_process() {
        let fx = Fixture::with(|c| c.expect_name = Some("fanoutd-not-sleep".into()));
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();

        let result = fx.supervisor.stop().await.unwrap();
        assert_eq!(result.status, ControlStatus::ErrorStalePid);
        assert!(process::is_alive(child.id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn start_reports_already_running() {
        let fx = Fixture::new();
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();

        let result = fx.supervisor.start(&[]).await.unwrap();
        assert_eq!(result.status, ControlStatus::AlreadyRunning);
        assert_eq!(result.pid, Some(child.id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn start_clears_a_lingering_lock_and_checks_again() {
        let fx = Fixture::with(|c| {
            c.relay_bin = PathBuf::from("/nonexistent/fanoutd");
            c.expect_name = Some("fanoutd-not-sleep".into());
        });
        let mut child = spawn_sleeper();
        fx.identity().write(child.id()).unwrap();
        fx.lock().write(child.id()).unwrap();
        assert_eq!(fx.supervisor.status().unwrap().status, ControlStatus::ErrorStalePid);

        let result = fx.supervisor.start(&[]).await.unwrap();
        assert_eq!(result.status, ControlStatus::ErrorStarting);
        assert!(!fx.identity().exists());
        assert!(!fx.lock().exists());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn start_with_missing_binary_fails() {
        let fx = Fixture::with(|c| c.relay_bin = PathBuf::from("/nonexistent/fanoutd"));
        let result = fx.supervisor.start(&[]).await.unwrap();
        assert_eq!(result.status, ControlStatus::ErrorStarting);
        assert!(result.message.contains("/nonexistent/fanoutd"));
    }

    #[tokio::test]
    async fn start_reports_a_relay_that_never_comes_up() {
        // `true` exits at once without writing any record.
        let fx = Fixture::with(|c| c.relay_bin = PathBuf::from("true"));
        std::fs::write(fx.supervisor.config.paths.activity_log(), "line one\nline two\n").unwrap();

        let result = fx.supervisor.start(&[]).await.unwrap();
        assert_eq!(result.status, ControlStatus::ErrorStarting);
        assert!(result.message.contains("line one | line two"));
    }

    #[test]
    fn result_serializes_as_snake_case_json() {
        let result = ControlResult::new(ControlStatus::AlreadyRunning, Some(42), "relay is already running");
        let json: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();
        assert_eq!(json["status"], "already_running");
        assert_eq!(json["pid"], 42);
        assert_eq!(json["message"], "relay is already running");

        let bare = ControlResult::new(ControlStatus::Stopped, None, "").to_json();
        assert_eq!(bare, r#"{"status":"stopped"}"#);
    }
}
