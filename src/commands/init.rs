use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::config::resolve::CONFIG_FILENAME;

pub fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config_path = init_in(&cwd)?;

    println!("Created {} in {}", CONFIG_FILENAME, cwd.display());
    println!();
    println!("  Config: {}", config_path.display());
    println!();
    println!("Add your API keys, then run `proxyme start` to begin.");
    Ok(())
}

/// Write a starter config into `dir`. Refuses to overwrite.
pub fn init_in(dir: &Path) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        bail!("{} already exists in {}", CONFIG_FILENAME, dir.display());
    }

    // A checkout of the proxy itself is the most likely place to run init.
    let source = dir
        .join("proxy.js")
        .is_file()
        .then(|| dir.display().to_string());
    std::fs::write(&config_path, render_template(source.as_deref()))?;
    Ok(config_path)
}

pub fn render_template(source: Option<&str>) -> String {
    let source_line = match source {
        Some(dir) => format!("source = '{dir}'"),
        None => "# source = \"./proxy\"             # copy proxy.js and package*.json from here".to_string(),
    };

    format!(
        r#"[proxy]
name = "default"
host = "localhost"
port = 3000
# home = "~/.proxyme"               # working dir is <home>/proxy, logs in <home>/logs
# entry = "proxy.js"
{source_line}

# Extra environment for the proxy process.
[proxy.env]
DEBUG = "true"

# -- Runtime --
# [runtime]
# interpreter = "node"
# candidates = ["/usr/local/bin/node", "~/.nvm/versions/node/*/bin/node"]
# package_manager = "npm"
# install_args = ["install"]
# marker = "node_modules"

# -- Timing (milliseconds) --
# [timing]
# settle_ms = 2000
# probe_timeout_ms = 5000
# stop_grace_ms = 5000
# kill_wait_ms = 2000
# restart_after_stop_ms = 7000

# -- Models --
# Keys land in <home>/proxy/.env the first time it is generated and are
# never written to models.json.
[[models]]
name = "deepseek-chat"
provider = "deepseek"
endpoint = "https://api.deepseek.com/v1/chat/completions"
api_key = ""
temperature = 0.3

[[models]]
name = "sonar"
provider = "perplexity"
endpoint = "https://api.perplexity.ai/chat/completions"
api_key = ""
enabled = false
category = "search"
# [models.headers]
# "X-Custom" = "value"
# [models.body]
# top_p = "0.9"
"#
    )
}
