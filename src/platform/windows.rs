use tokio::process::Command;
use tracing::debug;

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, CREATE_NEW_PROCESS_GROUP,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE,
};

use super::Signalled;

const STILL_ACTIVE: u32 = 259;

pub fn configure_process_group(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub fn request_termination(pid: u32) -> std::io::Result<Signalled> {
    if !is_process_alive(pid) {
        return Ok(Signalled::NotRunning);
    }
    // The child was spawned with CREATE_NEW_PROCESS_GROUP, so its PID is the
    // console process-group id.
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    debug!(pid, "sent CTRL_BREAK_EVENT");
    Ok(Signalled::Delivered)
}

pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    kill_pid(pid)
}

pub fn kill_pid(pid: u32) -> std::io::Result<Signalled> {
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            if !is_process_alive(pid) {
                return Ok(Signalled::NotRunning);
            }
            return Err(std::io::Error::last_os_error());
        }
        let result = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if result == 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!(pid, "terminated process");
    Ok(Signalled::Delivered)
}

pub fn signal_stop(pid: u32) -> std::io::Result<Signalled> {
    // No console-less way to ask a foreign console process to shut down
    // gracefully, so the supervisor is terminated and the caller falls back
    // to stopping the recorded child itself.
    kill_pid(pid)
}

pub fn signal_restart(_pid: u32) -> std::io::Result<Signalled> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "remote restart is not supported on Windows; run `proxyme stop` then `proxyme start`",
    ))
}

pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        result != 0 && exit_code == STILL_ACTIVE
    }
}

/// Parse `netstat -ano -p TCP` output for listeners on `port`.
pub fn port_owner_pids(port: u16) -> std::io::Result<Vec<u32>> {
    let output = std::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let suffix = format!(":{}", port);

    let mut pids = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || fields[3] != "LISTENING" || !fields[1].ends_with(&suffix) {
            continue;
        }
        if let Ok(pid) = fields[4].parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    Ok(pids)
}

pub fn process_command_line(_pid: u32) -> Option<String> {
    None
}
