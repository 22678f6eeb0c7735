//! Singleton startup and coordinated shutdown.
//!
//! A [`Controller`] takes the Singleton Lock, publishes the Process Identity,
//! binds the three listeners and hands back a [`RunningRelay`]. The relay
//! runs until a termination signal, a caller-supplied future, or an explicit
//! stop; [`RunningRelay::shutdown`] then stops every listener within a
//! bounded time and removes both records.

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::metrics::{start_metrics_server, HealthState};
use crate::registry::Registry;
use crate::server::WsServer;
use crate::shutdown::{StopSignal, TerminationSignals};
use crate::tcp::TcpIngress;
use crate::udp::UdpIngress;
use fanout_common::{process, PidFileError, PidRecord};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Attempts at the create/inspect/remove cycle before giving up on the lock.
const LOCK_ATTEMPTS: usize = 5;
/// Pause before re-inspecting a lock whose content could not be read.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Where the relay is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing acquired yet.
    Init,
    /// Acquiring the Singleton Lock.
    Locking,
    /// Lock held, identity published, listeners accepting.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Everything released.
    Terminated,
}

/// Result of [`Controller::start`].
pub enum Startup {
    /// Another live instance holds the lock. Nothing was touched.
    AlreadyRunning {
        /// PID recorded in the lock.
        pid: u32,
    },
    /// This process owns the lock and the listeners are up.
    Running(RunningRelay),
}

/// Builds and starts a relay.
pub struct Controller {
    config: RelayConfig,
    signal_handlers: bool,
    state: watch::Sender<LifecycleState>,
}

impl Controller {
    /// Controller for `config`. Signal handlers are off by default.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Init);
        Self {
            config,
            signal_handlers: false,
            state,
        }
    }

    /// Install SIGINT/SIGTERM handlers during startup so that
    /// [`RunningRelay::run_until`] returns on either.
    #[must_use]
    pub fn with_signal_handlers(mut self) -> Self {
        self.signal_handlers = true;
        self
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Acquire the lock, publish the identity and start the listeners.
    ///
    /// # Errors
    ///
    /// - [`RelayError::RuntimeDir`] if the runtime directory cannot be created
    /// - [`RelayError::Lock`] if the lock cannot be inspected or created
    /// - [`RelayError::Identity`] if the identity record cannot be written; the
    ///   lock is released first
    /// - [`RelayError::NoListeners`] if none of the listeners could bind; both
    ///   records are released first
    pub async fn start(self) -> Result<Startup, RelayError> {
        let Self {
            config,
            signal_handlers,
            state,
        } = self;

        let paths = config.paths();
        paths
            .ensure_dir()
            .map_err(|source| RelayError::RuntimeDir {
                path: paths.dir().to_path_buf(),
                source,
            })?;

        state.send_replace(LifecycleState::Locking);
        let pid = process::current_pid();
        let lock = PidRecord::new(paths.lock_file());
        let identity = PidRecord::new(paths.pid_file());

        match acquire_lock(&lock, pid) {
            Ok(LockOutcome::Acquired) => {
                info!("LOCK: acquired {} for PID {pid}", lock.path().display());
            }
            Ok(LockOutcome::Held(holder)) => {
                warn!("LOCK: another instance is already running (PID {holder})");
                state.send_replace(LifecycleState::Terminated);
                return Ok(Startup::AlreadyRunning { pid: holder });
            }
            Err(e) => {
                state.send_replace(LifecycleState::Terminated);
                return Err(e);
            }
        }

        if let Err(e) = identity.write(pid) {
            error!("PID: could not write {}: {e}", identity.path().display());
            release_lock(&lock, pid);
            state.send_replace(LifecycleState::Terminated);
            return Err(RelayError::Identity(e));
        }
        info!("PID: process {pid} recorded in {}", identity.path().display());

        let signals = if signal_handlers {
            match TerminationSignals::install() {
                Ok(signals) => Some(signals),
                Err(e) => {
                    warn!("SIGNAL: could not install handlers: {e}");
                    None
                }
            }
        } else {
            None
        };

        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let stop = StopSignal::new();

        let tcp = bound(
            TcpIngress::bind(config.tcp_addr(), dispatcher.clone(), config.poll_interval).await,
        );
        let udp = bound(
            UdpIngress::bind(config.udp_addr(), dispatcher.clone(), config.poll_interval).await,
        );
        let ws = bound(
            WsServer::bind(
                config.ws_addr(),
                dispatcher,
                config.subscriber_queue,
                config.join_timeout / 2,
            )
            .await,
        );

        if tcp.is_none() && udp.is_none() && ws.is_none() {
            error!("SERVER: no listener could be started");
            if let Err(e) = identity.remove() {
                warn!("PID: could not remove {}: {e}", identity.path().display());
            }
            release_lock(&lock, pid);
            state.send_replace(LifecycleState::Terminated);
            return Err(RelayError::NoListeners);
        }

        let tcp_addr = tcp.as_ref().and_then(|t| t.local_addr().ok());
        let udp_addr = udp.as_ref().and_then(|u| u.local_addr().ok());
        let ws_addr = ws.as_ref().and_then(|w| w.local_addr().ok());

        let tcp_task = tcp.map(|t| tokio::spawn(t.run(stop.clone())));
        let udp_task = udp.map(|u| tokio::spawn(u.run(stop.clone())));
        let ws_task = ws.map(|w| tokio::spawn(w.run(stop.clone())));

        let health = HealthState::new();
        let metrics_task = config.metrics_addr.map(|addr| {
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = start_metrics_server(addr, health).await {
                    warn!("METRICS: server on {addr} stopped: {e}");
                }
            })
        });

        state.send_replace(LifecycleState::Running);
        health.set_ready(true);
        info!("SERVER: relay running (PID {pid})");

        Ok(Startup::Running(RunningRelay {
            pid,
            lock,
            identity,
            join_timeout: config.join_timeout,
            registry,
            stop,
            state,
            health,
            signals,
            tcp_addr,
            udp_addr,
            ws_addr,
            tcp_task,
            udp_task,
            ws_task,
            metrics_task,
        }))
    }
}

/// Why [`RunningRelay::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A termination signal arrived; carries its name.
    Signal(&'static str),
    /// The future passed to `run_until` completed.
    Requested,
    /// The stop handle was triggered.
    Stopped,
    /// The WebSocket server ended on its own.
    ListenerExited,
}

/// A started relay. Call [`RunningRelay::shutdown`] to release it.
pub struct RunningRelay {
    pid: u32,
    lock: PidRecord,
    identity: PidRecord,
    join_timeout: Duration,
    registry: Arc<Registry>,
    stop: StopSignal,
    state: watch::Sender<LifecycleState>,
    health: HealthState,
    signals: Option<TerminationSignals>,
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    ws_addr: Option<SocketAddr>,
    tcp_task: Option<JoinHandle<()>>,
    udp_task: Option<JoinHandle<()>>,
    ws_task: Option<JoinHandle<()>>,
    metrics_task: Option<JoinHandle<()>>,
}

impl RunningRelay {
    /// Bound TCP address, if the TCP listener started.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Bound UDP address, if the UDP listener started.
    #[must_use]
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    /// Bound WebSocket address, if the WebSocket server started.
    #[must_use]
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// The live subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Readiness as reported on `/ready`.
    #[must_use]
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Handle that makes [`RunningRelay::run_until`] return when triggered.
    #[must_use]
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Wait for whichever comes first: a termination signal, `until`
    /// completing, the stop handle, or the WebSocket server exiting.
    pub async fn run_until<F>(&mut self, until: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let reason = {
            let Self {
                signals,
                stop,
                ws_task,
                ..
            } = self;

            let signal = async {
                match signals {
                    Some(signals) => signals.recv().await,
                    None => std::future::pending().await,
                }
            };
            let ws_exit = async {
                match ws_task {
                    Some(task) => {
                        let _ = task.await;
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                name = signal => StopReason::Signal(name),
                () = until => StopReason::Requested,
                () = stop.stopped() => StopReason::Stopped,
                () = ws_exit => StopReason::ListenerExited,
            }
        };

        match reason {
            StopReason::Signal(name) => info!("SIGNAL: received {name}, initiating shutdown"),
            StopReason::ListenerExited => {
                self.ws_task = None;
                warn!("SERVER: WebSocket server exited unexpectedly");
            }
            StopReason::Requested | StopReason::Stopped => {
                info!("SERVER: shutdown requested");
            }
        }
        reason
    }

    /// Stop every listener and release both records.
    ///
    /// Each listener gets the configured join timeout; one that overruns is
    /// aborted and shutdown continues. Safe to call after a partial startup.
    pub async fn shutdown(mut self) {
        info!("SERVER: shutting down");
        self.state.send_replace(LifecycleState::Stopping);
        self.health.set_ready(false);
        self.stop.trigger();

        let units = [
            ("WebSocket", self.ws_task.take()),
            ("TCP", self.tcp_task.take()),
            ("UDP", self.udp_task.take()),
        ];
        for (name, task) in units {
            if let Some(task) = task {
                join_unit(name, task, self.join_timeout).await;
            }
        }
        if let Some(task) = self.metrics_task.take() {
            task.abort();
        }

        match self.identity.remove() {
            Ok(()) => info!("PID: removed {}", self.identity.path().display()),
            Err(e) => warn!("PID: could not remove {}: {e}", self.identity.path().display()),
        }
        release_lock(&self.lock, self.pid);

        self.state.send_replace(LifecycleState::Terminated);
        info!("SERVER: shutdown complete");
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LockOutcome {
    Acquired,
    Held(u32),
}

/// Create the lock atomically, clearing it first if it names a dead process
/// or this process.
///
/// Removal is conditional on the lock still naming the PID judged stale, so a
/// lock won by a concurrent starter is never deleted. A lock without a
/// readable PID (empty or garbage) is never taken over: records are written
/// complete, so such content belongs to someone else.
fn acquire_lock(lock: &PidRecord, pid: u32) -> Result<LockOutcome, RelayError> {
    let mut last_err = PidFileError::Exists(lock.path().to_path_buf());
    for _ in 0..LOCK_ATTEMPTS {
        match lock.create_exclusive(pid) {
            Ok(()) => return Ok(LockOutcome::Acquired),
            Err(PidFileError::Exists(_)) => {}
            Err(e) => return Err(RelayError::Lock(e)),
        }

        match lock.read() {
            // A recycled PID can make our own PID show up in a stale lock.
            Ok(Some(holder)) if holder != pid && process::is_alive(holder) => {
                return Ok(LockOutcome::Held(holder));
            }
            Ok(Some(holder)) => {
                if lock.remove_if_owned(holder).map_err(RelayError::Lock)? {
                    info!("LOCK: removed stale lock left by PID {holder}");
                }
            }
            Ok(None) => {}
            Err(e @ PidFileError::Malformed { .. }) => {
                warn!("LOCK: {e}, not taking it over");
                last_err = e;
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(e) => return Err(RelayError::Lock(e)),
        }
    }
    Err(RelayError::Lock(last_err))
}

fn release_lock(lock: &PidRecord, pid: u32) {
    match lock.remove_if_owned(pid) {
        Ok(true) => info!("LOCK: released {}", lock.path().display()),
        Ok(false) => warn!("LOCK: {} no longer names PID {pid}, left in place", lock.path().display()),
        Err(e) => warn!("LOCK: could not release {}: {e}", lock.path().display()),
    }
}

fn bound<T>(result: Result<T, RelayError>) -> Option<T> {
    match result {
        Ok(unit) => Some(unit),
        Err(e) => {
            error!("SERVER: {e}");
            None
        }
    }
}

async fn join_unit(name: &str, mut task: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(())) => info!("SERVER: {name} listener stopped"),
        Ok(Err(e)) => warn!("SERVER: {name} listener task failed: {e}"),
        Err(_) => {
            warn!("SERVER: {name} listener did not stop within {limit:?}, aborting");
            task.abort();
        }
    }
}
