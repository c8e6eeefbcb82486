use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::model::RuntimeSection;
use crate::platform::expand_home;
use crate::supervisor::log_sink::LogSink;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static regex"));

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{interpreter} was not found (tried: {})", tried.join(", "))]
    InterpreterNotFound {
        interpreter: String,
        tried: Vec<String>,
    },
}

/// One place to look for the interpreter, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Bare command name resolved through `PATH` by the OS.
    OnPath(String),
    Fixed(PathBuf),
    /// `<versions>/<latest>/<binary>`, e.g. nvm's `versions/node/v20.11.1/bin/node`.
    VersionManager { versions: PathBuf, binary: PathBuf },
}

impl Candidate {
    /// Parse a configured candidate; `*` marks the version directory.
    pub fn parse(raw: &str) -> Self {
        let raw = expand_home(raw);
        if let Some((prefix, suffix)) = raw.split_once('*') {
            return Candidate::VersionManager {
                versions: PathBuf::from(prefix),
                binary: PathBuf::from(suffix.trim_start_matches(['/', '\\'])),
            };
        }
        let path = PathBuf::from(&raw);
        if path.components().count() > 1 || path.is_absolute() {
            Candidate::Fixed(path)
        } else {
            Candidate::OnPath(raw)
        }
    }

    /// The concrete program to try, if this candidate can produce one.
    pub fn expand(&self) -> Option<PathBuf> {
        match self {
            Candidate::OnPath(name) => Some(PathBuf::from(name)),
            Candidate::Fixed(path) => Some(path.clone()),
            Candidate::VersionManager { versions, binary } => {
                latest_version_dir(versions).map(|dir| dir.join(binary))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Candidate::OnPath(name) => format!("{} (PATH)", name),
            Candidate::Fixed(path) => path.display().to_string(),
            Candidate::VersionManager { versions, binary } => {
                versions.join("*").join(binary).display().to_string()
            }
        }
    }
}

/// A validated interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub path: PathBuf,
    pub version: String,
}

impl Interpreter {
    /// Directory holding the interpreter, when the path names one.
    pub fn bin_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct InterpreterResolver {
    name: String,
    candidates: Vec<Candidate>,
    version_arg: String,
}

impl InterpreterResolver {
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>, version_arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates,
            version_arg: version_arg.into(),
        }
    }

    pub fn from_config(cfg: &RuntimeSection) -> Self {
        let candidates = match &cfg.candidates {
            Some(list) => list.iter().map(|c| Candidate::parse(c)).collect(),
            None => default_candidates(&cfg.interpreter, crate::platform::home_dir().as_deref()),
        };
        Self::new(&cfg.interpreter, candidates, &cfg.version_arg)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Run `<program> <version_arg>` and return its trimmed output on exit 0.
    pub async fn check(&self, program: &Path) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.arg(&self.version_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(VERSION_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(program = %program.display(), error = %e, "candidate not runnable");
                return None;
            }
            Err(_) => {
                debug!(program = %program.display(), "candidate version check timed out");
                return None;
            }
        };
        if !output.status.success() {
            debug!(program = %program.display(), status = %output.status, "candidate rejected");
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // Some tools print their version on stderr.
        let version = if stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        } else {
            stdout
        };
        Some(version)
    }

    /// First candidate that answers the version check with exit code 0.
    pub async fn find(&self, sink: &LogSink) -> Result<Interpreter, EnvironmentError> {
        let mut tried = Vec::new();
        for candidate in &self.candidates {
            let Some(program) = candidate.expand() else {
                tried.push(candidate.describe());
                continue;
            };
            if let Some(version) = self.check(&program).await {
                sink.write(format!(
                    "Found {} {} at: {}",
                    self.name,
                    version,
                    program.display()
                ));
                return Ok(Interpreter {
                    path: program,
                    version,
                });
            }
            tried.push(program.display().to_string());
        }

        sink.write(format!("{} not found in any common location", self.name));
        Err(EnvironmentError::InterpreterNotFound {
            interpreter: self.name.clone(),
            tried,
        })
    }

    /// Check every candidate; used by `doctor`.
    pub async fn survey(&self) -> Vec<(String, Option<String>)> {
        let mut results = Vec::new();
        for candidate in &self.candidates {
            let version = match candidate.expand() {
                Some(program) => self.check(&program).await,
                None => None,
            };
            results.push((candidate.describe(), version));
        }
        results
    }
}

/// PATH first, then fixed install prefixes, then version-manager directories.
pub fn default_candidates(interpreter: &str, home: Option<&Path>) -> Vec<Candidate> {
    let mut candidates = vec![Candidate::OnPath(interpreter.to_string())];

    #[cfg(unix)]
    for prefix in [
        "/opt/homebrew/bin",
        "/usr/local/bin",
        "/usr/bin",
        "/usr/local/opt/node/bin",
    ] {
        candidates.push(Candidate::Fixed(Path::new(prefix).join(interpreter)));
    }

    #[cfg(windows)]
    candidates.push(Candidate::Fixed(
        Path::new(r"C:\Program Files\nodejs").join(format!("{}.exe", interpreter)),
    ));

    if let Some(home) = home {
        #[cfg(unix)]
        candidates.push(Candidate::VersionManager {
            versions: home.join(".nvm").join("versions").join("node"),
            binary: Path::new("bin").join(interpreter),
        });
        #[cfg(windows)]
        candidates.push(Candidate::VersionManager {
            versions: home.join("AppData").join("Roaming").join("nvm"),
            binary: PathBuf::from(format!("{}.exe", interpreter)),
        });
    }

    candidates
}

/// The newest entry of a version-manager directory. Entries that parse as
/// versions (`v20.11.1`, `18.2`) sort numerically and beat ones that do not;
/// the rest sort lexicographically.
pub fn latest_version_dir(versions: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(versions).ok()?;
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .max_by(|a, b| compare_versions(a, b))
        .map(|name| versions.join(name))
}

fn parse_version(name: &str) -> Option<(u64, u64, u64)> {
    let caps = VERSION_RE.captures(name)?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some((part(1), part(2), part(3)))
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn compare_versions_is_numeric() {
        assert_eq!(compare_versions("v10.1.0", "v9.12.3"), Ordering::Greater);
        assert_eq!(compare_versions("v20.11.1", "v20.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("18", "v18.0.0"), Ordering::Less);
        assert_eq!(compare_versions("system", "v4.0.0"), Ordering::Less);
        assert_eq!(compare_versions("alpha", "beta"), Ordering::Less);
    }

    #[test]
    fn latest_version_dir_picks_highest() {
        let tmp = TempDir::new().unwrap();
        for v in ["v9.11.2", "v18.19.0", "v10.0.0"] {
            std::fs::create_dir_all(tmp.path().join(v).join("bin")).unwrap();
        }
        std::fs::write(tmp.path().join("v99.0.0"), "not a dir").unwrap();

        assert_eq!(
            latest_version_dir(tmp.path()),
            Some(tmp.path().join("v18.19.0"))
        );
    }

    #[test]
    fn latest_version_dir_missing_is_none() {
        assert_eq!(latest_version_dir(Path::new("/nonexistent/versions")), None);
    }

    #[test]
    fn parse_candidates() {
        assert_eq!(Candidate::parse("node"), Candidate::OnPath("node".to_string()));
        assert_eq!(
            Candidate::parse("/usr/bin/node"),
            Candidate::Fixed(PathBuf::from("/usr/bin/node"))
        );
        assert_eq!(
            Candidate::parse("/opt/nvm/versions/node/*/bin/node"),
            Candidate::VersionManager {
                versions: PathBuf::from("/opt/nvm/versions/node/"),
                binary: PathBuf::from("bin/node"),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn default_candidates_order_path_first_version_manager_last() {
        let home = Path::new("/home/dev");
        let candidates = default_candidates("node", Some(home));
        assert_eq!(candidates[0], Candidate::OnPath("node".to_string()));
        assert_eq!(
            candidates[1],
            Candidate::Fixed(PathBuf::from("/opt/homebrew/bin/node"))
        );
        assert!(matches!(
            candidates.last(),
            Some(Candidate::VersionManager { versions, .. })
                if versions == &home.join(".nvm/versions/node")
        ));
    }

    #[test]
    fn interpreter_bin_dir() {
        let bare = Interpreter {
            path: PathBuf::from("node"),
            version: "v20".into(),
        };
        assert_eq!(bare.bin_dir(), None);
        let full = Interpreter {
            path: PathBuf::from("/usr/local/bin/node"),
            version: "v20".into(),
        };
        assert_eq!(full.bin_dir(), Some(Path::new("/usr/local/bin")));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::supervisor::testutil::write_script;

        #[tokio::test]
        async fn find_skips_failing_candidates() {
            let tmp = TempDir::new().unwrap();
            let broken = write_script(tmp.path(), "broken", "exit 3\n");
            let good = write_script(
                tmp.path(),
                "good",
                "if [ \"$1\" = \"--version\" ]; then echo v20.11.1; exit 0; fi\nexit 1\n",
            );
            let resolver = InterpreterResolver::new(
                "node",
                vec![
                    Candidate::Fixed(tmp.path().join("missing")),
                    Candidate::Fixed(broken),
                    Candidate::Fixed(good.clone()),
                ],
                "--version",
            );
            let sink = LogSink::detached();
            let mut rx = sink.subscribe();

            let found = resolver.find(&sink).await.unwrap();
            assert_eq!(found.path, good);
            assert_eq!(found.version, "v20.11.1");
            assert!(rx.try_recv().unwrap().text.starts_with("Found node v20.11.1 at:"));
        }

        #[tokio::test]
        async fn find_reports_every_tried_location() {
            let tmp = TempDir::new().unwrap();
            let resolver = InterpreterResolver::new(
                "node",
                vec![
                    Candidate::Fixed(tmp.path().join("a")),
                    Candidate::VersionManager {
                        versions: tmp.path().join("nvm"),
                        binary: PathBuf::from("bin/node"),
                    },
                ],
                "--version",
            );

            let err = resolver.find(&LogSink::detached()).await.unwrap_err();
            let EnvironmentError::InterpreterNotFound { tried, .. } = &err;
            assert_eq!(tried.len(), 2);
            assert!(err.to_string().starts_with("node was not found"));
        }

        #[tokio::test]
        async fn version_manager_candidate_uses_latest() {
            let tmp = TempDir::new().unwrap();
            let versions = tmp.path().join("versions");
            for v in ["v16.0.0", "v20.1.0"] {
                let bin = versions.join(v).join("bin");
                std::fs::create_dir_all(&bin).unwrap();
                write_script(&bin, "node", &format!("echo {v}\n"));
            }
            let resolver = InterpreterResolver::new(
                "node",
                vec![Candidate::VersionManager {
                    versions,
                    binary: PathBuf::from("bin/node"),
                }],
                "--version",
            );

            let found = resolver.find(&LogSink::detached()).await.unwrap();
            assert_eq!(found.version, "v20.1.0");
        }
    }
}
