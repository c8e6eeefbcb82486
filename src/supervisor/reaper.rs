use std::fmt;
use tracing::{info, warn};

use crate::platform::{self, Signalled};
use crate::supervisor::log_sink::LogSink;

/// Result of a best-effort cleanup step. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Succeeded(String),
    NothingToDo(String),
    Failed(String),
}

impl CleanupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CleanupOutcome::Failed(_))
    }

    pub fn message(&self) -> &str {
        match self {
            CleanupOutcome::Succeeded(m) | CleanupOutcome::NothingToDo(m) | CleanupOutcome::Failed(m) => m,
        }
    }

    /// Record the outcome of `step` to the sink and diagnostics.
    pub fn report(&self, step: &str, sink: &LogSink) {
        match self {
            CleanupOutcome::Failed(m) => warn!(step, "{}", m),
            _ => info!(step, "{}", self.message()),
        }
        sink.write(format!("{}: {}", step, self));
    }
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupOutcome::Succeeded(m) => write!(f, "{}", m),
            CleanupOutcome::NothingToDo(m) => write!(f, "nothing to do ({})", m),
            CleanupOutcome::Failed(m) => write!(f, "failed ({})", m),
        }
    }
}

/// Kills whatever is still listening on the proxy port.
pub trait PortReaper: Send + Sync {
    fn reap(&self, port: u16) -> CleanupOutcome;
}

/// Looks the port owner up through the OS and force-kills it. Never kills
/// the calling process.
#[derive(Debug, Clone)]
pub struct OsPortReaper {
    own_pid: u32,
}

impl OsPortReaper {
    pub fn new() -> Self {
        Self {
            own_pid: std::process::id(),
        }
    }
}

impl Default for OsPortReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl PortReaper for OsPortReaper {
    fn reap(&self, port: u16) -> CleanupOutcome {
        let pids = match platform::port_owner_pids(port) {
            Ok(pids) => pids,
            Err(e) => return CleanupOutcome::Failed(format!("could not look up port {}: {}", port, e)),
        };
        let targets: Vec<u32> = pids.into_iter().filter(|&pid| pid != self.own_pid).collect();
        if targets.is_empty() {
            return CleanupOutcome::NothingToDo(format!("no orphan listening on port {}", port));
        }

        let mut killed = Vec::new();
        let mut errors = Vec::new();
        for pid in targets {
            match platform::kill_pid(pid) {
                Ok(Signalled::Delivered) => killed.push(pid.to_string()),
                Ok(Signalled::NotRunning) => {}
                Err(e) => errors.push(format!("PID {}: {}", pid, e)),
            }
        }

        if !errors.is_empty() {
            CleanupOutcome::Failed(errors.join("; "))
        } else if killed.is_empty() {
            CleanupOutcome::NothingToDo(format!("port {} owner already exited", port))
        } else {
            CleanupOutcome::Succeeded(format!(
                "killed PID {} on port {}",
                killed.join(", "),
                port
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn display_forms() {
        assert_eq!(CleanupOutcome::Succeeded("killed PID 7".into()).to_string(), "killed PID 7");
        assert_eq!(
            CleanupOutcome::NothingToDo("no orphan".into()).to_string(),
            "nothing to do (no orphan)"
        );
        let failed = CleanupOutcome::Failed("permission denied".into());
        assert!(failed.is_failure());
        assert_eq!(failed.to_string(), "failed (permission denied)");
    }

    #[test]
    fn report_writes_to_sink() {
        let sink = LogSink::detached();
        let mut rx = sink.subscribe();
        CleanupOutcome::Failed("boom".into()).report("Orphan reap", &sink);
        assert_eq!(rx.try_recv().unwrap().text, "Orphan reap: failed (boom)");
    }

    #[test]
    fn unused_port_is_nothing_to_do() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = OsPortReaper::new().reap(port);
        assert!(!outcome.is_failure(), "{outcome}");
        assert!(!matches!(outcome, CleanupOutcome::Succeeded(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn never_kills_own_process() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = OsPortReaper::new().reap(port);
        assert!(matches!(outcome, CleanupOutcome::NothingToDo(_)), "{outcome}");
        drop(listener);
    }
}
