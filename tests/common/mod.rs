#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("proxyme.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    /// Rewrite the config with `[proxy].home` inside the project dir.
    /// `body` is appended after the `[proxy]` table.
    pub fn write_home_config(&self, port: u16, body: &str) {
        let config = format!(
            r#"[proxy]
host = "127.0.0.1"
port = {port}
home = '{home}'
{body}
"#,
            home = self.home().display()
        );
        std::fs::write(&self.config_path, config).unwrap();
    }

    pub fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.home().join("proxy")
    }

    pub fn log_file(&self) -> PathBuf {
        self.home().join("logs").join("proxyme-default.log")
    }

    pub fn state_file(&self) -> PathBuf {
        self.home().join("state.json")
    }

    pub fn config_arg(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

pub const MODEL_TOML: &str = r#"
[[models]]
name = "deepseek-chat"
provider = "deepseek"
endpoint = "https://api.deepseek.com/v1/chat/completions"
api_key = "sk-integration-0000"
"#;

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll `state.json` until `pred` holds for its parsed contents.
pub async fn wait_for_state(
    path: &Path,
    timeout: Duration,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> Option<serde_json::Value> {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&content) {
                if pred(&v) {
                    return Some(v);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake `node` that runs its entry file as a shell script, and a
/// `proxy.js` that serves `/health` with python's http.server.
/// Returns the TOML to append to the project config.
#[cfg(unix)]
pub fn fake_proxy_runtime(root: &Path) -> String {
    let bin = root.join("bin");
    let node = write_script(
        &bin,
        "node",
        "if [ \"$1\" = \"--version\" ]; then echo v20.11.1; exit 0; fi\nexec /bin/sh \"$@\"\n",
    );
    write_script(
        &bin,
        "npm",
        "mkdir -p node_modules\necho 'added 1 package'\n",
    );

    let source = root.join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(
        source.join("proxy.js"),
        "mkdir -p www\necho ok > www/health\ncd www\necho \"listening on $PORT\"\nexec python3 -m http.server \"$PORT\" --bind 127.0.0.1\n",
    )
    .unwrap();

    format!(
        r#"source = '{source}'

[runtime]
candidates = ['{node}']

[timing]
settle_ms = 1000
probe_timeout_ms = 2000
stop_grace_ms = 3000
kill_wait_ms = 1000
restart_after_stop_ms = 200
restart_after_cleanup_ms = 200
restart_after_regenerate_ms = 200
"#,
        source = source.display(),
        node = node.display()
    )
}
