use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::config;
use crate::platform::{self, Signalled};
use crate::supervisor::reaper::{CleanupOutcome, OsPortReaper, PortReaper};
use crate::supervisor::state::ProxyState;
use crate::supervisor::Timing;

/// Extra time the supervisor gets on top of its own stop budget.
const SUPERVISOR_SLACK: Duration = Duration::from_secs(5);

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let home = config.proxy.home_dir();
    let timing = Timing::from_config(&config.timing);

    let Some(state) = ProxyState::load(&home) else {
        println!("Proxy is not running");
        return Ok(());
    };

    let supervisor_pid = state.supervisor_pid;
    if platform::is_process_alive(supervisor_pid) {
        let signalled = platform::signal_stop(supervisor_pid)
            .with_context(|| format!("failed to signal supervisor (PID {})", supervisor_pid))?;
        if signalled == Signalled::Delivered {
            println!("Stopping proxy (supervisor PID {})...", supervisor_pid);
            let budget = timing.stop_grace + timing.kill_wait + SUPERVISOR_SLACK;
            if !platform::wait_for_exit(supervisor_pid, budget).await {
                bail!(
                    "supervisor (PID {}) did not exit within {}",
                    supervisor_pid,
                    humantime::format_duration(budget)
                );
            }
            if ProxyState::load(&home).is_none() {
                println!("Proxy stopped");
                return Ok(());
            }
        }
    }

    // The supervisor is gone. Whatever it left behind is ours to clean up.
    if let Some(pid) = state.child_pid.filter(|pid| platform::is_process_alive(*pid)) {
        stop_orphan(pid, &timing).await;
    }

    let port = state.port;
    let reap = tokio::task::spawn_blocking(move || OsPortReaper::new().reap(port))
        .await
        .unwrap_or_else(|e| CleanupOutcome::Failed(e.to_string()));
    println!("  Orphan cleanup: {}", reap);

    ProxyState::remove(&home, supervisor_pid)?;
    println!("Proxy stopped");
    Ok(())
}

async fn stop_orphan(pid: u32, timing: &Timing) {
    println!("  Proxy process {} outlived its supervisor, stopping it", pid);
    let graceful = signal_outcome(platform::request_termination(pid));
    println!("  Graceful stop: {}", graceful);
    if platform::wait_for_exit(pid, timing.stop_grace).await {
        return;
    }

    println!("  Forcing process termination...");
    let forced = signal_outcome(platform::force_kill(pid));
    println!("  Forced kill: {}", forced);
    platform::wait_for_exit(pid, timing.kill_wait).await;
}

fn signal_outcome(result: std::io::Result<Signalled>) -> CleanupOutcome {
    match result {
        Ok(Signalled::Delivered) => CleanupOutcome::Succeeded("signal sent".to_string()),
        Ok(Signalled::NotRunning) => CleanupOutcome::NothingToDo("already exited".to_string()),
        Err(e) => CleanupOutcome::Failed(e.to_string()),
    }
}
