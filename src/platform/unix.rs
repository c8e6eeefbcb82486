use tokio::process::Command;
use tracing::debug;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use super::Signalled;

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

fn deliver(result: nix::Result<()>, pid: u32, signal: Signal) -> std::io::Result<Signalled> {
    match result {
        Ok(()) => {
            debug!(pid, ?signal, "signal delivered");
            Ok(Signalled::Delivered)
        }
        Err(Errno::ESRCH) => {
            debug!(pid, ?signal, "process already exited");
            Ok(Signalled::NotRunning)
        }
        Err(e) => Err(std::io::Error::from(e)),
    }
}

/// Children are spawned as process-group leaders, so the group id equals the
/// child PID and signalling the group reaches any grandchildren too.
fn signal_group(pid: u32, signal: Signal) -> std::io::Result<Signalled> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        // No such group: the PID may still exist outside its own group.
        Err(Errno::ESRCH) => signal_one(pid, signal),
        result => deliver(result, pid, signal),
    }
}

fn signal_one(pid: u32, signal: Signal) -> std::io::Result<Signalled> {
    deliver(kill(Pid::from_raw(pid as i32), signal), pid, signal)
}

pub fn request_termination(pid: u32) -> std::io::Result<Signalled> {
    signal_group(pid, Signal::SIGTERM)
}

pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    signal_group(pid, Signal::SIGKILL)
}

pub fn kill_pid(pid: u32) -> std::io::Result<Signalled> {
    signal_one(pid, Signal::SIGKILL)
}

pub fn signal_stop(pid: u32) -> std::io::Result<Signalled> {
    signal_one(pid, Signal::SIGTERM)
}

pub fn signal_restart(pid: u32) -> std::io::Result<Signalled> {
    signal_one(pid, Signal::SIGHUP)
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Socket state code for LISTEN in /proc/net/tcp{,6}.
#[cfg(target_os = "linux")]
const TCP_LISTEN: &str = "0A";

#[cfg(target_os = "linux")]
fn listening_inodes(port: u16) -> Vec<String> {
    let port_hex = format!("{:04X}", port);
    let mut inodes = Vec::new();

    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                continue;
            }
            let local_port = fields[1].rsplit(':').next();
            if local_port == Some(port_hex.as_str()) && fields[9] != "0" {
                inodes.push(fields[9].to_string());
            }
        }
    }

    inodes
}

#[cfg(target_os = "linux")]
pub fn port_owner_pids(port: u16) -> std::io::Result<Vec<u32>> {
    let inodes = listening_inodes(port);
    if inodes.is_empty() {
        return Ok(Vec::new());
    }
    let needles: Vec<String> = inodes.iter().map(|i| format!("socket:[{}]", i)).collect();

    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| needles.iter().any(|n| link.to_string_lossy() == n.as_str()))
                .unwrap_or(false)
        });
        if owns_socket {
            pids.push(pid);
        }
    }

    Ok(pids)
}

#[cfg(not(target_os = "linux"))]
pub fn port_owner_pids(port: u16) -> std::io::Result<Vec<u32>> {
    let output = std::process::Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()?;
    // lsof exits 1 when nothing matches.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut pids: Vec<u32> = stdout
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect();
    pids.dedup();
    Ok(pids)
}

#[cfg(target_os = "linux")]
pub fn process_command_line(pid: u32) -> Option<String> {
    let cmdline = std::fs::read_to_string(format!("/proc/{}/cmdline", pid)).ok()?;
    let cmd = cmdline.replace('\0', " ").trim().to_string();
    (!cmd.is_empty()).then_some(cmd)
}

#[cfg(not(target_os = "linux"))]
pub fn process_command_line(pid: u32) -> Option<String> {
    let output = std::process::Command::new("ps")
        .args(["-o", "command=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    let cmd = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!cmd.is_empty()).then_some(cmd)
}
