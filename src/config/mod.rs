pub mod model;
pub mod resolve;
pub mod validate;

use std::path::Path;

use anyhow::bail;
use model::ProxyConfig;

pub fn load_config(path: &Path) -> anyhow::Result<ProxyConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: ProxyConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}

/// Resolve, load and validate the configuration the CLI should act on.
///
/// Falls back to built-in defaults when no config file exists anywhere in
/// the lookup chain.
pub fn load_effective(cli_file: Option<&Path>) -> anyhow::Result<ProxyConfig> {
    let config = match resolve::resolve_config(cli_file)? {
        Some(path) => {
            tracing::debug!(path = %path.display(), "using config file");
            load_config(&path)?
        }
        None => {
            tracing::debug!("no proxyme.toml found, using defaults");
            ProxyConfig::default()
        }
    };

    if let Err(errors) = validate::validate(&config) {
        let mut msg = String::from("Configuration errors:\n");
        for err in &errors {
            msg.push_str(&format!("  - {}\n", err));
        }
        bail!("{}", msg.trim_end());
    }

    Ok(config)
}
