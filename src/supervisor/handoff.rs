use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::model::{ModelConfig, RuntimeConfig};

/// Format version of `models.json` understood by the proxy script.
pub const MODELS_FORMAT_VERSION: &str = "2.1.0";

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("no enabled models to write")]
    NoEnabledModels,
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize models: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileOutcome {
    Created,
    KeptExisting,
}

/// Files the child reads at startup, generated from the runtime config.
pub trait RuntimeFiles: Send + Sync {
    /// Create the secrets file if it does not exist. An existing file is
    /// never read or modified.
    fn ensure_env_file(&self, config: &RuntimeConfig) -> Result<EnvFileOutcome, HandoffError>;

    /// Rewrite the model handoff file. Returns the number of models written.
    fn regenerate(&self, config: &RuntimeConfig) -> Result<usize, HandoffError>;

    /// Whether the generated files are visible to a freshly started child.
    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsDocument {
    pub version: String,
    pub generated_at: String,
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: String,
    pub provider: String,
    pub endpoint: String,
    pub enabled: bool,
    pub temperature: f64,
    pub stream: bool,
    pub category: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_body_params: BTreeMap<String, String>,
}

impl From<&ModelConfig> for ModelEntry {
    fn from(model: &ModelConfig) -> Self {
        let custom_headers = model
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            id: model.name.clone(),
            provider: model.provider.clone(),
            endpoint: model.endpoint.clone(),
            enabled: model.enabled,
            temperature: model.temperature,
            stream: model.stream,
            category: model.category.clone(),
            custom_headers,
            custom_body_params: model.body.clone(),
        }
    }
}

impl ModelsDocument {
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, HandoffError> {
        let models: Vec<ModelEntry> = config.enabled_models().map(ModelEntry::from).collect();
        if models.is_empty() {
            return Err(HandoffError::NoEnabledModels);
        }
        Ok(Self {
            version: MODELS_FORMAT_VERSION.to_string(),
            generated_at: Local::now().to_rfc3339(),
            models,
        })
    }
}

/// `PROVIDER_API_KEY` for a provider name.
pub fn api_key_var(provider: &str) -> String {
    let name: String = provider
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_API_KEY", name)
}

/// `.env` body: one key per provider, first enabled model with a key wins.
pub fn render_env_file(config: &RuntimeConfig) -> String {
    let mut keys: BTreeMap<String, &str> = BTreeMap::new();
    for model in config.enabled_models() {
        if model.api_key.is_empty() {
            continue;
        }
        keys.entry(api_key_var(&model.provider)).or_insert(&model.api_key);
    }

    let mut out = String::from("# Generated by proxyme. Edit freely; it is never overwritten.\n");
    for (var, key) in keys {
        out.push_str(&format!("{}={}\n", var, key));
    }
    out
}

/// `.env` and `models.json` in the proxy working directory.
#[derive(Debug, Clone)]
pub struct HandoffFiles {
    dir: PathBuf,
}

impl HandoffFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn env_file(&self) -> PathBuf {
        self.dir.join(".env")
    }

    pub fn models_file(&self) -> PathBuf {
        self.dir.join("models.json")
    }
}

impl RuntimeFiles for HandoffFiles {
    fn ensure_env_file(&self, config: &RuntimeConfig) -> Result<EnvFileOutcome, HandoffError> {
        let path = self.env_file();
        if path.exists() {
            return Ok(EnvFileOutcome::KeptExisting);
        }
        write_private(&path, render_env_file(config).as_bytes())?;
        Ok(EnvFileOutcome::Created)
    }

    fn regenerate(&self, config: &RuntimeConfig) -> Result<usize, HandoffError> {
        let document = ModelsDocument::from_config(config)?;
        let json = serde_json::to_string_pretty(&document)?;
        write_private(&self.models_file(), json.as_bytes())?;
        Ok(document.models.len())
    }

    fn is_ready(&self) -> bool {
        self.models_file().is_file() && self.env_file().is_file()
    }
}

/// Owner-only atomic write: tmp file then rename.
fn write_private(path: &Path, content: &[u8]) -> Result<(), HandoffError> {
    let to_err = |source| HandoffError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path).map_err(to_err)?;
    file.write_all(content).map_err(to_err)?;
    file.sync_all().map_err(to_err)?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(to_err)?;
    Ok(())
}
