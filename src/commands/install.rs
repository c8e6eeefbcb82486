use anyhow::{Context, Result};
use std::path::Path;

use crate::config;
use crate::supervisor::environment::InterpreterResolver;
use crate::supervisor::installer::{DependencyInstaller, InstallOutcome};
use crate::supervisor::log_sink::LogSink;
use crate::supervisor::workspace::Workspace;
use crate::supervisor::SupervisorOptions;
use crate::ui::logs::LogEcho;

pub async fn run(config_file: Option<&Path>, force: bool) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let SupervisorOptions {
        workspace,
        resolver,
        installer,
        sink,
        ..
    } = SupervisorOptions::from_config(&config);

    let echo = tokio::spawn(LogEcho::new(sink.subscribe()).run());
    let result = install(&workspace, &resolver, &installer, &sink, force).await;

    sink.close();
    drop(sink);
    let _ = echo.await;
    result
}

async fn install(
    workspace: &Workspace,
    resolver: &InterpreterResolver,
    installer: &DependencyInstaller,
    sink: &LogSink,
    force: bool,
) -> Result<()> {
    let dir = workspace
        .prepare()
        .context("failed to prepare working directory")?;
    let interpreter = resolver.find(sink).await?;

    if force {
        installer.reinstall(&dir, &interpreter, sink).await?;
        return Ok(());
    }
    if installer.ensure(&dir, &interpreter, sink).await? == InstallOutcome::AlreadyInstalled {
        sink.write(format!(
            "Dependencies already installed in {} (use --force to reinstall)",
            installer.marker_path(&dir).display()
        ));
    }
    Ok(())
}
