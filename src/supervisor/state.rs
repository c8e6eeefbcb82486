use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::supervisor::ProxyStatus;

/// What a running `proxyme start` records so other invocations can find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyState {
    pub instance: String,
    pub supervisor_pid: u32,
    #[serde(default)]
    pub child_pid: Option<u32>,
    pub host: String,
    pub port: u16,
    pub status: ProxyStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl ProxyState {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join("state.json")
    }

    pub fn save(&self, state_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(state_dir)?;
        let path = Self::path(state_dir);
        let content = serde_json::to_string_pretty(self)?;
        // Atomic write: write to tmp file then rename
        let tmp_path = state_dir.join("state.json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn load(state_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(state_dir)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove the state file, but only if it still belongs to `supervisor_pid`.
    pub fn remove(state_dir: &Path, supervisor_pid: u32) -> anyhow::Result<()> {
        let _lock = Self::lock_state(state_dir);
        let path = Self::path(state_dir);
        match Self::load(state_dir) {
            Some(state) if state.supervisor_pid != supervisor_pid => {}
            _ if path.exists() => std::fs::remove_file(&path)?,
            _ => {}
        }
        Ok(())
    }

    /// Acquire an exclusive file lock on state.json.lock.
    /// Returns the lock file handle (lock released on drop).
    fn lock_state(state_dir: &Path) -> Option<std::fs::File> {
        std::fs::create_dir_all(state_dir).ok()?;
        let lock_path = state_dir.join("state.json.lock");
        let lock_file = std::fs::File::create(&lock_path).ok()?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fd is valid for the lifetime of lock_file
            unsafe {
                libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX);
            }
        }

        Some(lock_file)
    }

    /// Write a fresh record under the lock.
    pub fn record(&self, state_dir: &Path) -> anyhow::Result<()> {
        let _lock = Self::lock_state(state_dir);
        self.save(state_dir)
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}
