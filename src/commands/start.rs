use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config;
use crate::config::model::RuntimeConfig;
use crate::platform;
use crate::supervisor::state::ProxyState;
use crate::supervisor::{
    LaunchOutcome, PhaseOutcome, ProxyStatus, StopOutcome, Supervisor, SupervisorEvent,
};
use crate::ui::logs::LogEcho;
use crate::ui::summary::print_startup_banner;

/// What the user asked the foreground supervisor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Stop,
    Restart,
}

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?,
            hup: signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?,
        })
    }

    async fn next(&mut self) -> Request {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Request::Stop,
            _ = self.term.recv() => Request::Stop,
            _ = self.hup.recv() => Request::Restart,
        }
    }
}

#[cfg(windows)]
struct Signals;

#[cfg(windows)]
impl Signals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Request {
        let _ = tokio::signal::ctrl_c().await;
        Request::Stop
    }
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let home = config.proxy.home_dir();

    if let Some(existing) = ProxyState::load(&home) {
        if existing.supervisor_pid != std::process::id()
            && platform::is_process_alive(existing.supervisor_pid)
        {
            bail!(
                "proxyme is already running (PID {}) on {}:{}; use `proxyme stop` first",
                existing.supervisor_pid,
                existing.host,
                existing.port
            );
        }
    }

    let supervisor = Supervisor::from_config(&config);
    let sink = supervisor.log_sink();
    print_startup_banner(&config.proxy.host, config.proxy.port, sink.path());

    let echo = tokio::spawn(LogEcho::new(sink.subscribe()).run());
    let mut events = supervisor.subscribe_events();
    let mut signals = Signals::install()?;

    let result = supervise(
        &supervisor,
        config_file,
        config.runtime_config(),
        &mut signals,
        &mut events,
    )
    .await;

    // Let the last lines reach the terminal before the echo goes away.
    tokio::task::yield_now().await;
    echo.abort();
    result
}

async fn supervise(
    supervisor: &Supervisor,
    config_file: Option<&Path>,
    mut runtime: RuntimeConfig,
    signals: &mut Signals,
    events: &mut broadcast::Receiver<SupervisorEvent>,
) -> Result<()> {
    match supervisor.launch(&runtime).await.context("failed to start proxy")? {
        LaunchOutcome::Started { status: ProxyStatus::Warning, pid } => {
            warn!(pid, "proxy is running but its health check failed");
        }
        LaunchOutcome::Started { pid, .. } => info!(pid, port = runtime.port, "proxy started"),
        LaunchOutcome::AlreadyRunning { pid } => info!(pid, "proxy already running"),
        LaunchOutcome::AlreadyStarting => {}
    }

    loop {
        tokio::select! {
            request = signals.next() => match request {
                Request::Stop => {
                    eprintln!("\nShutting down...");
                    shutdown(supervisor).await;
                    return Ok(());
                }
                Request::Restart => {
                    match config::load_effective(config_file) {
                        Ok(reloaded) => runtime = reloaded.runtime_config(),
                        Err(e) => {
                            let error = format!("{:#}", e);
                            warn!(%error, "config reload failed, restarting with the previous configuration");
                        }
                    }
                    if restart(supervisor, &runtime, signals).await? == Request::Stop {
                        shutdown(supervisor).await;
                        return Ok(());
                    }
                }
            },
            event = events.recv() => match event {
                Ok(SupervisorEvent::ChildExited { pid, code, expected: false }) => {
                    match code {
                        Some(code) => bail!("proxy (PID {}) exited unexpectedly with code {}", pid, code),
                        None => bail!("proxy (PID {}) was terminated unexpectedly", pid),
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn shutdown(supervisor: &Supervisor) {
    if let StopOutcome::Stopped(report) = supervisor.stop().await {
        if report.had_failures() {
            warn!(pid = report.pid, "proxy stopped with cleanup failures, see the log file");
        }
    }
}

/// Run the restart pipeline while still listening for signals. A stop
/// request is acknowledged at once and returned once the pipeline is done;
/// the pipeline itself is never interrupted halfway.
async fn restart(
    supervisor: &Supervisor,
    runtime: &RuntimeConfig,
    signals: &mut Signals,
) -> Result<Request> {
    let pipeline = supervisor.restart(runtime);
    tokio::pin!(pipeline);

    let mut next = Request::Restart;
    let result = loop {
        tokio::select! {
            result = &mut pipeline => break result,
            request = signals.next() => match request {
                Request::Stop if next != Request::Stop => {
                    eprintln!("\nShutting down after the restart in progress...");
                    next = Request::Stop;
                }
                Request::Stop => {}
                Request::Restart => info!("restart already in progress"),
            },
        }
    };

    let report = result.context("restart failed")?;
    for (phase, outcome) in &report.phases {
        if let PhaseOutcome::Failed(msg) = outcome {
            warn!(%phase, error = %msg, "restart phase failed");
        }
    }
    Ok(next)
}
