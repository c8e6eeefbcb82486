use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::model::RuntimeSection;
use crate::supervisor::environment::Interpreter;
use crate::supervisor::log_sink::{read_line_lossy, LogSink};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {}", code.map(|c| format!("code {}", c)).unwrap_or_else(|| "a signal".to_string()))]
    Failed { program: String, code: Option<i32> },
    #[error("failed to remove {}: {source}", path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed,
}

/// Runs the package manager in the working directory when the marker
/// directory (e.g. `node_modules`) is missing.
///
/// Two supervisors sharing a working directory can both see the marker
/// missing and install concurrently; package managers tolerate this but the
/// install then runs twice.
#[derive(Debug, Clone)]
pub struct DependencyInstaller {
    package_manager: String,
    args: Vec<String>,
    marker: String,
}

impl DependencyInstaller {
    pub fn new(package_manager: impl Into<String>, args: Vec<String>, marker: impl Into<String>) -> Self {
        Self {
            package_manager: package_manager.into(),
            args,
            marker: marker.into(),
        }
    }

    pub fn from_config(cfg: &RuntimeSection) -> Self {
        Self::new(&cfg.package_manager, cfg.install_args.clone(), &cfg.marker)
    }

    pub fn marker_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.marker)
    }

    pub fn is_installed(&self, dir: &Path) -> bool {
        self.marker_path(dir).is_dir()
    }

    /// The package manager next to the interpreter, or the bare command name
    /// when no sibling exists.
    pub fn program_for(&self, interpreter: &Interpreter) -> PathBuf {
        let file_name = if cfg!(windows) {
            format!("{}.cmd", self.package_manager)
        } else {
            self.package_manager.clone()
        };
        interpreter
            .bin_dir()
            .map(|dir| dir.join(&file_name))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(&self.package_manager))
    }

    /// Install unless the marker directory already exists.
    pub async fn ensure(
        &self,
        dir: &Path,
        interpreter: &Interpreter,
        sink: &LogSink,
    ) -> Result<InstallOutcome, InstallError> {
        if self.is_installed(dir) {
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        sink.write("Installing dependencies (this may take a minute)...");
        self.install(dir, interpreter, sink).await?;
        Ok(InstallOutcome::Installed)
    }

    /// Remove the marker directory and install from scratch.
    pub async fn reinstall(
        &self,
        dir: &Path,
        interpreter: &Interpreter,
        sink: &LogSink,
    ) -> Result<(), InstallError> {
        let marker = self.marker_path(dir);
        if marker.exists() {
            sink.write(format!("Removing {}", marker.display()));
            tokio::fs::remove_dir_all(&marker).await.map_err(|source| InstallError::Clean {
                path: marker.clone(),
                source,
            })?;
        }
        self.install(dir, interpreter, sink).await
    }

    async fn install(
        &self,
        dir: &Path,
        interpreter: &Interpreter,
        sink: &LogSink,
    ) -> Result<(), InstallError> {
        let program = self.program_for(interpreter);
        let label = format!("{} {}", self.package_manager, self.args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Package-manager shims re-exec the interpreter by name.
        if let Some(bin_dir) = interpreter.bin_dir() {
            let mut paths = vec![bin_dir.to_path_buf()];
            if let Some(current) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&current));
            }
            if let Ok(joined) = std::env::join_paths(paths) {
                cmd.env("PATH", joined);
            }
        }

        info!(program = %program.display(), dir = %dir.display(), "running {}", label);
        let mut child = cmd.spawn().map_err(|source| InstallError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(forward_lines(out, sink.clone(), label.clone()))
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(forward_lines(err, sink.clone(), label.clone()))
        });

        let status = child.wait().await.map_err(|source| InstallError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.await;
        }

        if status.success() {
            sink.write(format!("{}: completed", label));
            Ok(())
        } else {
            sink.write(format!("{}: failed with {}", label, status));
            Err(InstallError::Failed {
                program: label,
                code: status.code(),
            })
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, sink: LogSink, label: String) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match read_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => sink.write(format!("{}: {}", label, line)),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "install output read error");
                break;
            }
        }
    }
}
