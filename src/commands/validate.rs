use anyhow::{bail, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::config::resolve::resolve_config;
use crate::config::validate::validate;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let Some(config_path) = resolve_config(config_file)? else {
        bail!("no proxyme.toml found; run `proxyme init` to create one");
    };

    let config = config::load_config(&config_path)?;

    let filename = config_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "proxyme.toml".to_string());

    match validate(&config) {
        Ok(()) => {
            let enabled = config.models.iter().filter(|m| m.enabled).count();
            println!(
                "  {} {} is valid ({} models, {} enabled)",
                "\u{2713}".green(),
                filename,
                config.models.len(),
                enabled,
            );
            Ok(())
        }
        Err(errors) => {
            for err in errors {
                let report: miette::Report = err.into();
                eprintln!("{:?}", report);
            }
            std::process::exit(1);
        }
    }
}
