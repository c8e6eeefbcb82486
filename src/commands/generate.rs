use anyhow::{Context, Result};
use std::path::Path;

use crate::config;
use crate::supervisor::handoff::{EnvFileOutcome, HandoffFiles, RuntimeFiles};
use crate::supervisor::workspace::Workspace;
use crate::ui::summary::{models_table, print_table};

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let workspace = Workspace::new(
        config.proxy.home_dir(),
        &config.proxy.entry,
        config.proxy.source_dir(),
    );
    let dir = workspace
        .prepare()
        .context("failed to prepare working directory")?;

    let runtime = config.runtime_config();
    let files = HandoffFiles::new(&dir);

    let count = files.regenerate(&runtime)?;
    println!(
        "  Wrote {} ({} enabled model{})",
        files.models_file().display(),
        count,
        if count == 1 { "" } else { "s" }
    );

    match files.ensure_env_file(&runtime)? {
        EnvFileOutcome::Created => println!("  Created {}", files.env_file().display()),
        EnvFileOutcome::KeptExisting => {
            println!("  Kept existing {}", files.env_file().display())
        }
    }

    println!();
    print_table(&models_table(&config.models));
    Ok(())
}
