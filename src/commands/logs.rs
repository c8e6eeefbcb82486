use anyhow::{Context, Result};
use std::path::Path;

use crate::config;
use crate::supervisor::log_sink::tail;
use crate::supervisor::workspace::Workspace;

pub fn run(config_file: Option<&Path>, lines: usize) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let workspace = Workspace::new(
        config.proxy.home_dir(),
        &config.proxy.entry,
        config.proxy.source_dir(),
    );
    let path = workspace.log_file(&config.proxy.name);

    if !path.exists() {
        println!("No log file yet at {}", path.display());
        return Ok(());
    }

    let recent = tail(&path, lines).with_context(|| format!("failed to read {}", path.display()))?;
    for line in recent {
        println!("{}", line);
    }
    Ok(())
}
