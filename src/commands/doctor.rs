use anyhow::Result;
use comfy_table::Cell;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::platform;
use crate::supervisor::environment::InterpreterResolver;
use crate::supervisor::installer::DependencyInstaller;
use crate::supervisor::workspace::Workspace;
use crate::ui::summary::{new_table, print_table};

fn mark(ok: bool, use_color: bool) -> String {
    match (ok, use_color) {
        (true, true) => format!("{}", "[ok]".green()),
        (false, true) => format!("{}", "[!!]".red()),
        (true, false) => "[ok]".to_string(),
        (false, false) => "[!!]".to_string(),
    }
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = config::load_effective(config_file)?;
    let use_color = std::io::stdout().is_terminal();
    let home = config.proxy.home_dir();
    let workspace = Workspace::new(&home, &config.proxy.entry, config.proxy.source_dir());
    let resolver = InterpreterResolver::from_config(&config.runtime);
    let installer = DependencyInstaller::from_config(&config.runtime);

    println!("proxyme doctor");
    println!("==============");
    println!();

    println!("  {} candidates:", config.runtime.interpreter);
    let survey = resolver.survey().await;
    let found = survey.iter().any(|(_, version)| version.is_some());
    let mut table = new_table();
    table.set_header(vec!["", "Location", "Version"]);
    for (location, version) in &survey {
        table.add_row(vec![
            Cell::new(mark(version.is_some(), use_color)),
            Cell::new(location),
            Cell::new(version.as_deref().unwrap_or("-")),
        ]);
    }
    print_table(&table);
    println!();

    let dir = workspace.proxy_dir();
    let marker = installer.marker_path(&dir);
    let entry = dir.join(workspace.entry());
    let checks = [
        (
            "working directory",
            dir.is_dir(),
            dir.display().to_string(),
        ),
        ("entry script", entry.is_file(), entry.display().to_string()),
        (
            "dependencies",
            installer.is_installed(&dir),
            marker.display().to_string(),
        ),
        (
            "secrets file",
            workspace.env_file().is_file(),
            workspace.env_file().display().to_string(),
        ),
        (
            "models file",
            workspace.models_file().is_file(),
            workspace.models_file().display().to_string(),
        ),
    ];

    let mut all_ok = found;
    for (name, ok, detail) in &checks {
        println!("  {} {:<18} {}", mark(*ok, use_color), name, detail);
        all_ok &= *ok;
    }

    let port = config.proxy.port;
    if platform::check_port_available(port) {
        println!("  {} {:<18} {} is free", mark(true, use_color), "port", port);
    } else {
        let owner = platform::identify_port_owner(port).unwrap_or_else(|| "unknown process".to_string());
        println!(
            "  {} {:<18} {} is in use by {}",
            mark(false, use_color),
            "port",
            port,
            owner
        );
        all_ok = false;
    }

    println!();
    if !found {
        println!(
            "{} was not found. Install it or list its location under [runtime].candidates.",
            config.runtime.interpreter
        );
    } else if all_ok {
        println!("Everything looks good.");
    } else {
        println!("Some checks failed. `proxyme install` and `proxyme generate` fix most of them.");
        println!("A busy port is expected while the proxy is running.");
    }

    Ok(())
}
