use anyhow::Result;
use comfy_table::Cell;
use is_terminal::IsTerminal;
use std::path::Path;
use std::time::Duration;

use crate::config;
use crate::platform;
use crate::supervisor::health::HttpProber;
use crate::supervisor::installer::DependencyInstaller;
use crate::supervisor::state::ProxyState;
use crate::supervisor::workspace::Workspace;
use crate::supervisor::{ProxyStatus, Timing};
use crate::ui::summary::{new_table, print_table, status_text};

/// Combine the recorded state with a live probe. A dead supervisor means
/// nobody is watching the proxy, whatever the file says.
pub fn effective_status(state: Option<&ProxyState>, healthy: bool) -> ProxyStatus {
    match state {
        None => ProxyStatus::Inactive,
        Some(_) if healthy => ProxyStatus::Active,
        Some(s) if s.child_pid.is_some_and(platform::is_process_alive) => ProxyStatus::Warning,
        Some(_) => ProxyStatus::Inactive,
    }
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let home = config.proxy.home_dir();
    let timing = Timing::from_config(&config.timing);
    let use_color = std::io::stdout().is_terminal();

    let state = ProxyState::load(&home).filter(|s| platform::is_process_alive(s.supervisor_pid));
    let (host, port) = match &state {
        Some(s) => (s.host.clone(), s.port),
        None => (config.proxy.host.clone(), config.proxy.port),
    };
    let healthy = HttpProber::new(timing.probe_timeout).check(&host, port).await;
    let status = effective_status(state.as_ref(), healthy);

    let workspace = Workspace::new(&home, &config.proxy.entry, config.proxy.source_dir());
    let installer = DependencyInstaller::from_config(&config.runtime);

    let mut table = new_table();
    table.add_row(vec![Cell::new("Status"), Cell::new(status_text(status, use_color))]);
    table.add_row(vec![
        Cell::new("Endpoint"),
        Cell::new(format!("http://{}:{}", host, port)),
    ]);
    if let Some(s) = &state {
        table.add_row(vec![
            Cell::new("Supervisor PID"),
            Cell::new(s.supervisor_pid),
        ]);
        table.add_row(vec![
            Cell::new("Proxy PID"),
            Cell::new(
                s.child_pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
        let uptime = Duration::from_secs(s.uptime().num_seconds().max(0) as u64);
        table.add_row(vec![
            Cell::new("Uptime"),
            Cell::new(humantime::format_duration(uptime)),
        ]);
        if let Some(log) = &s.log_file {
            table.add_row(vec![Cell::new("Log file"), Cell::new(log.display())]);
        }
    }
    let deps = if installer.is_installed(&workspace.proxy_dir()) {
        "installed"
    } else {
        "missing (run `proxyme install`)"
    };
    table.add_row(vec![Cell::new("Dependencies"), Cell::new(deps)]);
    print_table(&table);

    if state.is_none() && healthy {
        println!();
        println!(
            "  Note: something answers on port {} but no supervisor is recorded.",
            port
        );
        println!("  Run `proxyme stop` or `proxyme doctor` to find it.");
    }
    Ok(())
}
