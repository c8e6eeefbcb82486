use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Artifacts copied from the bundle into the working directory on every launch.
pub const STAGED_FILES: &[&str] = &[
    "proxy.js",
    "package.json",
    "package-lock.json",
    "README.md",
    ".env.template",
];

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.-]").expect("static regex"));

/// Directory layout shared by every supervisor on the machine:
///
/// ```text
/// <root>/proxy/   working directory: entry script, node_modules, .env, models.json
/// <root>/logs/    one log file per instance
/// <root>/state.json
/// ```
///
/// Two supervisors may prepare the same root concurrently; every step is
/// "create if absent" so the loser of the race simply finds the directory
/// already there. Staged files are replaced wholesale, last writer wins.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    entry: String,
    source: Option<PathBuf>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, entry: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entry: entry.into(),
            source,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.root.join("proxy")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn env_file(&self) -> PathBuf {
        self.proxy_dir().join(".env")
    }

    pub fn models_file(&self) -> PathBuf {
        self.proxy_dir().join("models.json")
    }

    pub fn log_file(&self, instance: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("proxyme-{}.log", sanitize_instance_name(instance)))
    }

    /// Create the working directory if needed and stage bundled artifacts.
    /// Returns the working directory.
    pub fn prepare(&self) -> std::io::Result<PathBuf> {
        let dir = self.proxy_dir();
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        let staged = self.stage(&dir)?;
        debug!(dir = %dir.display(), staged, "workspace prepared");
        Ok(dir)
    }

    fn stage(&self, dir: &Path) -> std::io::Result<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };

        let mut names: Vec<&str> = STAGED_FILES.to_vec();
        if !names.contains(&self.entry.as_str()) {
            names.push(&self.entry);
        }

        let mut staged = 0;
        for name in names {
            let from = source.join(name);
            if !from.is_file() {
                continue;
            }
            std::fs::copy(&from, dir.join(name))?;
            staged += 1;
        }
        Ok(staged)
    }
}

/// Replace everything outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_instance_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").to_string()
}
