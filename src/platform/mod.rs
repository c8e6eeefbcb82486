use std::net::TcpListener;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

/// Result of delivering a signal (or its Windows equivalent) to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signalled {
    Delivered,
    /// The target was already gone.
    NotRunning,
}

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Ask a spawned child (and its process group) to shut down.
/// Unix: `SIGTERM` to the group, Windows: `CTRL_BREAK_EVENT`.
pub fn request_termination(pid: u32) -> std::io::Result<Signalled> {
    imp::request_termination(pid)
}

/// Unconditionally kill a spawned child and its process group.
pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    imp::force_kill(pid)
}

/// Unconditionally kill a single process that we did not spawn.
pub fn kill_pid(pid: u32) -> std::io::Result<Signalled> {
    imp::kill_pid(pid)
}

/// Ask a foreground `proxyme start` process to stop its proxy and exit.
pub fn signal_stop(pid: u32) -> std::io::Result<Signalled> {
    imp::signal_stop(pid)
}

/// Ask a foreground `proxyme start` process to run its restart pipeline.
pub fn signal_restart(pid: u32) -> std::io::Result<Signalled> {
    imp::signal_restart(pid)
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Poll until `pid` is gone or `timeout` elapses. Returns true if it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if path.starts_with("~/") {
            return format!("{}{}", home, &path[1..]);
        }
        if path.starts_with("$HOME/") || path.starts_with("$HOME\\") {
            return format!("{}{}", home, &path[5..]);
        }
    }
    path.to_string()
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// PIDs of processes listening on the given TCP port.
pub fn port_owner_pids(port: u16) -> std::io::Result<Vec<u32>> {
    imp::port_owner_pids(port)
}

/// Identify which process owns a given TCP port, for display.
pub fn identify_port_owner(port: u16) -> Option<String> {
    let pid = port_owner_pids(port).ok()?.into_iter().next()?;
    match imp::process_command_line(pid) {
        Some(cmd) if cmd.chars().count() > 60 => {
            let short: String = cmd.chars().take(57).collect();
            Some(format!("{}... (PID {})", short, pid))
        }
        Some(cmd) => Some(format!("{} (PID {})", cmd, pid)),
        None => Some(format!("PID {}", pid)),
    }
}
