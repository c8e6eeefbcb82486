use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

use crate::config;
use crate::platform::{self, Signalled};
use crate::supervisor::state::ProxyState;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let home = config.proxy.home_dir();

    let state = ProxyState::load(&home)
        .filter(|s| platform::is_process_alive(s.supervisor_pid))
        .ok_or_else(|| anyhow!("no running proxyme supervisor found; use `proxyme start`"))?;

    let pid = state.supervisor_pid;
    match platform::signal_restart(pid)
        .with_context(|| format!("failed to signal supervisor (PID {})", pid))?
    {
        Signalled::Delivered => {
            println!("Restart requested (supervisor PID {})", pid);
            println!("Follow progress with `proxyme logs`");
            Ok(())
        }
        Signalled::NotRunning => bail!("supervisor (PID {}) exited before it could restart", pid),
    }
}
