pub mod environment;
pub mod handoff;
pub mod health;
pub mod installer;
pub mod log_sink;
pub mod reaper;
pub mod state;
pub mod workspace;

#[cfg(all(test, unix))]
pub(crate) mod testutil;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::model::{ProxyConfig, RuntimeConfig, TimingConfig};
use crate::platform::{self, Signalled};

use self::environment::{EnvironmentError, Interpreter, InterpreterResolver};
use self::handoff::{EnvFileOutcome, HandoffError, HandoffFiles, RuntimeFiles};
use self::health::{HealthProbe, HttpProber};
use self::installer::{DependencyInstaller, InstallError, InstallOutcome};
use self::log_sink::{read_line_lossy, LogSink};
use self::reaper::{CleanupOutcome, OsPortReaper, PortReaper};
use self::state::ProxyState;
use self::workspace::Workspace;

/// How long to keep draining child output after the child itself exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// The externally visible health of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyStatus {
    Active,
    Warning,
    Inactive,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyStatus::Active => "Active",
            ProxyStatus::Warning => "Warning",
            ProxyStatus::Inactive => "Inactive",
        };
        f.write_str(s)
    }
}

/// Internal lifecycle phase. `Launching` and `Stopping` are transient and
/// collapse onto the three-valued [`ProxyStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Inactive,
    Launching,
    Active,
    Warning,
    Stopping,
}

impl SupervisorPhase {
    pub fn status(self) -> ProxyStatus {
        match self {
            SupervisorPhase::Inactive | SupervisorPhase::Launching => ProxyStatus::Inactive,
            SupervisorPhase::Active => ProxyStatus::Active,
            SupervisorPhase::Warning | SupervisorPhase::Stopping => ProxyStatus::Warning,
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorPhase::Inactive => "Inactive",
            SupervisorPhase::Launching => "Launching",
            SupervisorPhase::Active => "Active",
            SupervisorPhase::Warning => "Warning",
            SupervisorPhase::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StatusChanged { from: ProxyStatus, to: ProxyStatus },
    /// `expected` is true when the exit was caused by `stop`.
    ChildExited { pid: u32, code: Option<i32>, expected: bool },
}

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("dependency installation failed: {0}")]
    Install(#[from] InstallError),
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),
    #[error(transparent)]
    RuntimeFiles(#[from] HandoffError),
    #[error("proxy exited during startup ({})", code.map(|c| format!("exit code {}", c)).unwrap_or_else(|| "killed by signal".to_string()))]
    ExitedDuringStartup { code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning { pid: u32 },
    /// Another launch is in flight.
    AlreadyStarting,
    Started { status: ProxyStatus, pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub pid: u32,
    pub termination: CleanupOutcome,
    pub exited_gracefully: bool,
    /// Present only when the grace period ran out.
    pub forced: Option<CleanupOutcome>,
    pub reap: CleanupOutcome,
}

impl StopReport {
    pub fn had_failures(&self) -> bool {
        self.termination.is_failure()
            || self.forced.as_ref().is_some_and(CleanupOutcome::is_failure)
            || self.reap.is_failure()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Stopped(StopReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stop,
    Cleanup,
    Regenerate,
    Start,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartPhase::Stop => "Stop",
            RestartPhase::Cleanup => "Cleanup",
            RestartPhase::Regenerate => "Regenerate",
            RestartPhase::Start => "Start",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed(String),
    Skipped(String),
    Failed(String),
}

impl From<CleanupOutcome> for PhaseOutcome {
    fn from(outcome: CleanupOutcome) -> Self {
        match outcome {
            CleanupOutcome::Succeeded(m) => PhaseOutcome::Completed(m),
            CleanupOutcome::NothingToDo(m) => PhaseOutcome::Skipped(m),
            CleanupOutcome::Failed(m) => PhaseOutcome::Failed(m),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartReport {
    pub phases: Vec<(RestartPhase, PhaseOutcome)>,
    pub launch: Option<LaunchOutcome>,
}

impl RestartReport {
    pub fn order(&self) -> Vec<RestartPhase> {
        self.phases.iter().map(|(phase, _)| *phase).collect()
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub settle: Duration,
    pub probe_timeout: Duration,
    pub stop_grace: Duration,
    pub kill_wait: Duration,
    pub restart_after_stop: Duration,
    pub restart_after_cleanup: Duration,
    pub restart_after_regenerate: Duration,
}

impl Timing {
    pub fn from_config(cfg: &TimingConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.settle_ms),
            probe_timeout: Duration::from_millis(cfg.probe_timeout_ms),
            stop_grace: Duration::from_millis(cfg.stop_grace_ms),
            kill_wait: Duration::from_millis(cfg.kill_wait_ms),
            restart_after_stop: Duration::from_millis(cfg.restart_after_stop_ms),
            restart_after_cleanup: Duration::from_millis(cfg.restart_after_cleanup_ms),
            restart_after_regenerate: Duration::from_millis(cfg.restart_after_regenerate_ms),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

pub struct SupervisorOptions {
    pub workspace: Workspace,
    pub resolver: InterpreterResolver,
    pub installer: DependencyInstaller,
    pub timing: Timing,
    pub sink: LogSink,
    pub instance: String,
    /// Where to record `state.json`; `None` disables persistence.
    pub state_dir: Option<PathBuf>,
}

impl SupervisorOptions {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let home = config.proxy.home_dir();
        let workspace = Workspace::new(&home, &config.proxy.entry, config.proxy.source_dir());
        let sink = LogSink::to_file(workspace.log_file(&config.proxy.name));
        Self {
            resolver: InterpreterResolver::from_config(&config.runtime),
            installer: DependencyInstaller::from_config(&config.runtime),
            timing: Timing::from_config(&config.timing),
            instance: config.proxy.name.clone(),
            state_dir: Some(home),
            workspace,
            sink,
        }
    }
}

/// Replaceable side effects of the lifecycle.
#[derive(Clone)]
pub struct Collaborators {
    pub prober: Arc<dyn HealthProbe>,
    pub reaper: Arc<dyn PortReaper>,
    pub files: Arc<dyn RuntimeFiles>,
}

impl Collaborators {
    pub fn system(workspace: &Workspace, timing: &Timing) -> Self {
        Self {
            prober: Arc::new(HttpProber::new(timing.probe_timeout)),
            reaper: Arc::new(OsPortReaper::new()),
            files: Arc::new(HandoffFiles::new(workspace.proxy_dir())),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ExitInfo {
    code: Option<i32>,
}

struct TrackedChild {
    pid: u32,
    generation: u64,
    exit: Option<ExitInfo>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

struct Session {
    phase: SupervisorPhase,
    child: Option<TrackedChild>,
    generation: u64,
    endpoint: Option<(String, u16)>,
    started_at: DateTime<Utc>,
    /// Bumped for every state snapshot taken under the session lock.
    state_seq: u64,
    /// Written to `state.json` once the session lock is released.
    pending_state: Option<(u64, StateWrite)>,
}

enum StateWrite {
    Record(ProxyState),
    Remove,
}

/// Session lock that flushes a pending `state.json` write after unlocking,
/// so file locking never happens while the session is held.
struct SessionGuard<'a> {
    guard: Option<MutexGuard<'a, Session>>,
    supervisor: &'a Supervisor,
}

impl std::ops::Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.guard.as_deref().unwrap_or_else(|| unreachable!("session guard used after drop"))
    }
}

impl std::ops::DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!("session guard used after drop"))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let pending = self.guard.as_mut().and_then(|s| s.pending_state.take());
        self.guard = None;
        if let Some((seq, write)) = pending {
            self.supervisor.write_state(seq, write);
        }
    }
}

struct Inner {
    options: SupervisorOptions,
    collaborators: Collaborators,
    /// Serializes launch, stop and restart.
    op_lock: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
    /// Sequence number of the last snapshot written to `state.json`.
    state_written: Mutex<u64>,
    status_tx: watch::Sender<ProxyStatus>,
    events_tx: broadcast::Sender<SupervisorEvent>,
}

/// Owns the proxy child process and its lifecycle.
///
/// Cloning is cheap and every clone drives the same child. Exit
/// notifications from the child are applied under the same lock as caller
/// operations and carry the generation of the spawn they belong to, so an
/// exit from a previous child never touches a newer one.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let collaborators = Collaborators::system(&options.workspace, &options.timing);
        Self::with_collaborators(options, collaborators)
    }

    pub fn with_collaborators(options: SupervisorOptions, collaborators: Collaborators) -> Self {
        let (status_tx, _) = watch::channel(ProxyStatus::Inactive);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                options,
                collaborators,
                op_lock: tokio::sync::Mutex::new(()),
                session: Mutex::new(Session {
                    phase: SupervisorPhase::Inactive,
                    child: None,
                    generation: 0,
                    endpoint: None,
                    started_at: Utc::now(),
                    state_seq: 0,
                    pending_state: None,
                }),
                state_written: Mutex::new(0),
                status_tx,
                events_tx,
            }),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(SupervisorOptions::from_config(config))
    }

    fn session(&self) -> SessionGuard<'_> {
        SessionGuard {
            guard: Some(
                self.inner
                    .session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            supervisor: self,
        }
    }

    fn sink(&self) -> &LogSink {
        &self.inner.options.sink
    }

    pub fn log_sink(&self) -> LogSink {
        self.inner.options.sink.clone()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.options.workspace
    }

    /// Current status. Never blocks and never probes.
    pub fn status(&self) -> ProxyStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.session().phase
    }

    /// PID of the tracked child while it is alive.
    pub fn child_pid(&self) -> Option<u32> {
        self.session()
            .child
            .as_ref()
            .filter(|c| c.exit.is_none())
            .map(|c| c.pid)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ProxyStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events_tx.subscribe()
    }

    /// One on-demand probe of the endpoint the current child was launched
    /// on. Does not change the status; `false` when nothing was launched.
    pub async fn health_check(&self) -> bool {
        let endpoint = {
            let session = self.session();
            session.child.as_ref().and(session.endpoint.clone())
        };
        match endpoint {
            Some((host, port)) => self.inner.collaborators.prober.probe(&host, port).await,
            None => false,
        }
    }

    /// Must be called with the session locked.
    fn set_phase(&self, session: &mut Session, to: SupervisorPhase) {
        let from = session.phase;
        if from == to {
            return;
        }
        session.phase = to;
        debug!(%from, %to, "phase transition");
        self.sink().write(format!("State: {} -> {}", from, to));

        let (old, new) = (from.status(), to.status());
        if old != new {
            self.inner.status_tx.send_replace(new);
            let _ = self
                .inner
                .events_tx
                .send(SupervisorEvent::StatusChanged { from: old, to: new });
        }
        self.persist(session);
    }

    /// Snapshot the session for `state.json`. The write happens when the
    /// session guard is dropped.
    fn persist(&self, session: &mut Session) {
        if self.inner.options.state_dir.is_none() {
            return;
        }
        let write = if session.phase == SupervisorPhase::Inactive {
            StateWrite::Remove
        } else {
            let (host, port) = session.endpoint.clone().unwrap_or_default();
            StateWrite::Record(ProxyState {
                instance: self.inner.options.instance.clone(),
                supervisor_pid: std::process::id(),
                child_pid: session.child.as_ref().map(|c| c.pid),
                host,
                port,
                status: session.phase.status(),
                started_at: session.started_at,
                log_file: self.sink().path().map(Path::to_path_buf),
            })
        };
        session.state_seq += 1;
        session.pending_state = Some((session.state_seq, write));
    }

    /// Apply a snapshot unless a newer one has already been written.
    fn write_state(&self, seq: u64, write: StateWrite) {
        let Some(dir) = &self.inner.options.state_dir else {
            return;
        };
        let mut written = self
            .inner
            .state_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if seq <= *written {
            return;
        }
        *written = seq;
        let result = match write {
            StateWrite::Record(state) => state.record(dir),
            StateWrite::Remove => ProxyState::remove(dir, std::process::id()),
        };
        if let Err(e) = result {
            debug!(error = %e, "failed to update state file");
        }
    }

    // -----------------------------------------------------------------------
    // launch
    // -----------------------------------------------------------------------

    /// Start the proxy unless it is already running or starting.
    pub async fn launch(&self, config: &RuntimeConfig) -> Result<LaunchOutcome, SupervisorError> {
        let _guard = match self.inner.op_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) if self.phase() == SupervisorPhase::Launching => {
                self.sink().write("Proxy is already starting");
                return Ok(LaunchOutcome::AlreadyStarting);
            }
            Err(_) => self.inner.op_lock.lock().await,
        };
        self.launch_locked(config).await
    }

    /// Run [`Supervisor::launch`] on a background task.
    pub fn spawn_launch(&self, config: RuntimeConfig) -> JoinHandle<Result<LaunchOutcome, SupervisorError>> {
        let this = self.clone();
        tokio::spawn(async move { this.launch(&config).await })
    }

    async fn launch_locked(&self, config: &RuntimeConfig) -> Result<LaunchOutcome, SupervisorError> {
        if let Some(pid) = self.child_pid() {
            self.sink().write(format!("Proxy is already running (PID {})", pid));
            return Ok(LaunchOutcome::AlreadyRunning { pid });
        }

        {
            let mut session = self.session();
            session.endpoint = Some((config.host.clone(), config.port));
            session.started_at = Utc::now();
            self.set_phase(&mut session, SupervisorPhase::Launching);
        }
        info!(host = %config.host, port = config.port, "launching proxy");

        match self.run_launch(config).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "launch failed");
                self.sink().write(format!("Failed to start proxy: {}", e));
                let mut session = self.session();
                let spawned = session.child.take().is_some();
                self.set_phase(&mut session, SupervisorPhase::Inactive);
                if spawned {
                    self.sink().close();
                }
                Err(e)
            }
        }
    }

    async fn run_launch(&self, config: &RuntimeConfig) -> Result<LaunchOutcome, SupervisorError> {
        let options = &self.inner.options;
        let sink = self.sink();

        let dir = options.workspace.prepare().map_err(SupervisorError::Workspace)?;
        let interpreter = options.resolver.find(sink).await?;

        match options.installer.ensure(&dir, &interpreter, sink).await? {
            InstallOutcome::AlreadyInstalled => sink.write("Dependencies already installed"),
            InstallOutcome::Installed => sink.write("Dependencies installed"),
        }

        match self.inner.collaborators.files.ensure_env_file(config)? {
            EnvFileOutcome::Created => sink.write("Created .env file with API keys"),
            EnvFileOutcome::KeptExisting => {
                sink.write(".env file already exists, keeping existing API keys")
            }
        }

        let (pid, mut exit_rx) = self.spawn_child(&dir, &interpreter, config)?;
        sink.write("=== Proxy Started ===");
        sink.write(format!(
            "Running: {} {}",
            interpreter.path.display(),
            options.workspace.entry()
        ));
        sink.write(format!("Port: {}", config.port));
        if let Some(path) = sink.path() {
            sink.write(format!("Log file: {}", path.display()));
        }

        if let Some(exit) = wait_exit(&mut exit_rx, options.timing.settle).await {
            return Err(SupervisorError::ExitedDuringStartup { code: exit.code });
        }

        let healthy = self
            .inner
            .collaborators
            .prober
            .probe(&config.host, config.port)
            .await;

        let mut session = self.session();
        if let Some(exit) = session.child.as_ref().and_then(|c| c.exit) {
            return Err(SupervisorError::ExitedDuringStartup { code: exit.code });
        }
        let (phase, message) = if healthy {
            (
                SupervisorPhase::Active,
                format!("Proxy server started successfully on port {}", config.port),
            )
        } else {
            (
                SupervisorPhase::Warning,
                "Proxy started but health check failed".to_string(),
            )
        };
        sink.write(message);
        self.set_phase(&mut session, phase);
        Ok(LaunchOutcome::Started {
            status: phase.status(),
            pid,
        })
    }

    /// Spawn the child and publish its handle before returning.
    fn spawn_child(
        &self,
        dir: &Path,
        interpreter: &Interpreter,
        config: &RuntimeConfig,
    ) -> Result<(u32, watch::Receiver<Option<ExitInfo>>), SupervisorError> {
        let spawn_err = |source| SupervisorError::Spawn {
            path: interpreter.path.clone(),
            source,
        };

        let mut cmd = Command::new(&interpreter.path);
        cmd.arg(self.inner.options.workspace.entry())
            .current_dir(dir)
            .envs(&config.env)
            .env("PORT", config.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_err(std::io::Error::other("child exited before its PID was read")))?;
        debug!(pid, "child spawned");

        let sink = self.sink().clone();
        let mut forwarders = Vec::new();
        if let Some(out) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_output(out, sink.clone(), false)));
        }
        if let Some(err) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_output(err, sink, true)));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let generation = {
            let mut session = self.session();
            session.generation += 1;
            session.child = Some(TrackedChild {
                pid,
                generation: session.generation,
                exit: None,
                exit_rx: exit_rx.clone(),
            });
            self.persist(&mut session);
            session.generation
        };

        tokio::spawn(watch_child(
            Arc::downgrade(&self.inner),
            child,
            pid,
            generation,
            forwarders,
            exit_tx,
        ));
        Ok((pid, exit_rx))
    }

    /// Applied from the watcher task when the child exits on its own or
    /// because of `stop`.
    fn on_child_exit(&self, generation: u64, pid: u32, code: Option<i32>) {
        let mut session = self.session();
        match session.child.as_mut() {
            Some(child) if child.generation == generation => {
                child.exit = Some(ExitInfo { code });
            }
            _ => {
                debug!(pid, generation, "ignoring exit of a previous child");
                return;
            }
        }

        let expected = session.phase == SupervisorPhase::Stopping;
        self.sink().write(format!(
            "Proxy process terminated with exit code: {}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "none (signal)".to_string())
        ));

        // Launch and stop finish their own transitions.
        if matches!(
            session.phase,
            SupervisorPhase::Active | SupervisorPhase::Warning | SupervisorPhase::Inactive
        ) {
            warn!(pid, ?code, "proxy exited unexpectedly");
            session.child = None;
            self.set_phase(&mut session, SupervisorPhase::Inactive);
            self.sink().close();
        }
        drop(session);

        let _ = self
            .inner
            .events_tx
            .send(SupervisorEvent::ChildExited { pid, code, expected });
    }

    // -----------------------------------------------------------------------
    // stop
    // -----------------------------------------------------------------------

    /// Stop the proxy: graceful request, forced kill after the grace period,
    /// then port cleanup. Always ends `Inactive`.
    pub async fn stop(&self) -> StopOutcome {
        let _guard = self.inner.op_lock.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> StopOutcome {
        let timing = &self.inner.options.timing;
        let sink = self.sink();

        let (pid, generation, mut exit_rx, port) = {
            let mut session = self.session();
            let Some(child) = session.child.as_ref() else {
                self.set_phase(&mut session, SupervisorPhase::Inactive);
                drop(session);
                sink.write("Proxy is not running");
                return StopOutcome::AlreadyStopped;
            };
            let tracked = (
                child.pid,
                child.generation,
                child.exit_rx.clone(),
                session.endpoint.as_ref().map(|(_, port)| *port),
            );
            self.set_phase(&mut session, SupervisorPhase::Stopping);
            tracked
        };

        sink.write("=== Stopping Proxy ===");
        info!(pid, "stopping proxy");

        let termination = match platform::request_termination(pid) {
            Ok(Signalled::Delivered) => CleanupOutcome::Succeeded("termination requested".to_string()),
            Ok(Signalled::NotRunning) => CleanupOutcome::NothingToDo("process already exited".to_string()),
            Err(e) => CleanupOutcome::Failed(e.to_string()),
        };
        termination.report("Graceful stop", sink);

        let exited_gracefully = wait_exit(&mut exit_rx, timing.stop_grace).await.is_some();
        let forced = if exited_gracefully {
            None
        } else {
            sink.write("Forcing process termination...");
            let outcome = match platform::force_kill(pid) {
                Ok(Signalled::Delivered) => {
                    CleanupOutcome::Succeeded(format!("killed process group {}", pid))
                }
                Ok(Signalled::NotRunning) => {
                    CleanupOutcome::NothingToDo("process already exited".to_string())
                }
                Err(e) => CleanupOutcome::Failed(e.to_string()),
            };
            outcome.report("Forced kill", sink);
            if wait_exit(&mut exit_rx, timing.kill_wait).await.is_none() {
                warn!(pid, "proxy still running after forced kill");
            }
            Some(outcome)
        };

        let reap = match port {
            Some(port) => self.reap_port(port).await,
            None => CleanupOutcome::NothingToDo("no port recorded".to_string()),
        };

        {
            let mut session = self.session();
            if session.child.as_ref().map(|c| c.generation) == Some(generation) {
                session.child = None;
            }
            self.set_phase(&mut session, SupervisorPhase::Inactive);
        }
        sink.write("Proxy stopped");
        sink.close();

        StopOutcome::Stopped(StopReport {
            pid,
            termination,
            exited_gracefully,
            forced,
            reap,
        })
    }

    /// Wait until nothing listens on `port`, at most `bound`.
    async fn await_port_release(&self, port: u16, bound: Duration) {
        let sink = self.sink();
        sink.write(format!("Waiting for port {} to be released...", port));
        if !wait_until(bound, || platform::check_port_available(port)).await {
            sink.write(format!(
                "Port {} still in use after {}",
                port,
                humantime::format_duration(bound)
            ));
        }
    }

    async fn reap_port(&self, port: u16) -> CleanupOutcome {
        let reaper = Arc::clone(&self.inner.collaborators.reaper);
        let outcome = tokio::task::spawn_blocking(move || reaper.reap(port))
            .await
            .unwrap_or_else(|e| CleanupOutcome::Failed(format!("reaper task failed: {}", e)));
        outcome.report("Orphan cleanup", self.sink());
        outcome
    }

    // -----------------------------------------------------------------------
    // restart
    // -----------------------------------------------------------------------

    /// Stop, Cleanup, Regenerate, Start. The first three phases never fail
    /// the restart; only a Start failure is returned.
    pub async fn restart(&self, config: &RuntimeConfig) -> Result<RestartReport, SupervisorError> {
        let _guard = self.inner.op_lock.lock().await;
        let timing = &self.inner.options.timing;
        let sink = self.sink();
        let mut report = RestartReport::default();

        sink.write("=== Restarting Proxy ===");
        info!("restarting proxy");

        sink.write("PHASE 1: Stopping proxy...");
        let stop = match self.stop_locked().await {
            StopOutcome::AlreadyStopped => {
                PhaseOutcome::Skipped("proxy was not running".to_string())
            }
            StopOutcome::Stopped(r) if r.had_failures() => {
                sink.write("Warning during stop: some cleanup steps failed");
                PhaseOutcome::Failed(format!("stopped PID {} with cleanup failures", r.pid))
            }
            StopOutcome::Stopped(r) => {
                sink.write("Proxy stopped successfully");
                PhaseOutcome::Completed(format!("stopped PID {}", r.pid))
            }
        };
        let was_running = !matches!(stop, PhaseOutcome::Skipped(_));
        report.phases.push((RestartPhase::Stop, stop));
        if was_running {
            self.await_port_release(config.port, timing.restart_after_stop)
                .await;
        }

        sink.write("PHASE 2: Cleanup...");
        let cleanup = self.reap_port(config.port).await;
        report.phases.push((RestartPhase::Cleanup, cleanup.into()));
        self.await_port_release(config.port, timing.restart_after_cleanup)
            .await;

        sink.write("PHASE 3: Regenerating configuration...");
        let regenerate = match self.inner.collaborators.files.regenerate(config) {
            Ok(count) => {
                sink.write(format!("Models configuration generated ({} models)", count));
                PhaseOutcome::Completed(format!("{} models written", count))
            }
            Err(e) => {
                sink.write(format!("Warning: {}", e));
                PhaseOutcome::Failed(e.to_string())
            }
        };
        report.phases.push((RestartPhase::Regenerate, regenerate));
        let files = Arc::clone(&self.inner.collaborators.files);
        if !wait_until(timing.restart_after_regenerate, || files.is_ready()).await {
            sink.write(format!(
                "Configuration files not visible after {}, starting anyway",
                humantime::format_duration(timing.restart_after_regenerate)
            ));
        }

        sink.write("PHASE 4: Starting proxy...");
        match self.launch_locked(config).await {
            Ok(outcome) => {
                report
                    .phases
                    .push((RestartPhase::Start, PhaseOutcome::Completed(format!("{:?}", outcome))));
                report.launch = Some(outcome);
                Ok(report)
            }
            Err(e) => {
                sink.write(format!("ERROR starting proxy: {}", e));
                Err(e)
            }
        }
    }

    /// Run [`Supervisor::restart`] on a background task.
    pub fn spawn_restart(&self, config: RuntimeConfig) -> JoinHandle<Result<RestartReport, SupervisorError>> {
        let this = self.clone();
        tokio::spawn(async move { this.restart(&config).await })
    }
}

/// Poll `observed` until it holds or `bound` elapses. Returns whether it held.
async fn wait_until(bound: Duration, mut observed: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if observed() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until the child has exited or `timeout` elapses.
async fn wait_exit(
    rx: &mut watch::Receiver<Option<ExitInfo>>,
    timeout: Duration,
) -> Option<ExitInfo> {
    match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
        Ok(Ok(exit)) => *exit,
        // Timed out, or the watcher was dropped by a runtime shutdown.
        _ => None,
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, sink: LogSink, is_stderr: bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match read_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                let text = line.trim();
                if !text.is_empty() {
                    sink.child_output(text, is_stderr);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, is_stderr, "child output read error");
                break;
            }
        }
    }
}

/// Owns the child until it exits, then reports the exit to the supervisor
/// (if it still exists) and to anyone waiting on `exit_tx`.
async fn watch_child(
    inner: Weak<Inner>,
    mut child: Child,
    pid: u32,
    generation: u64,
    forwarders: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(pid, error = %e, "wait() failed");
            None
        }
    };
    debug!(pid, ?code, "child exited");

    // Grandchildren may keep the pipes open.
    for handle in forwarders {
        let _ = tokio::time::timeout(OUTPUT_DRAIN, handle).await;
    }

    if let Some(inner) = inner.upgrade() {
        Supervisor { inner }.on_child_exit(generation, pid, code);
    }
    let _ = exit_tx.send(Some(ExitInfo { code }));
}
