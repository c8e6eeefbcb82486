use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::platform::expand_home;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_home() -> String {
    "~/.proxyme".to_string()
}

fn default_entry() -> String {
    "proxy.js".to_string()
}

fn default_proxy_env() -> BTreeMap<String, String> {
    BTreeMap::from([("DEBUG".to_string(), "true".to_string())])
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProxySection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_home")]
    pub home: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_proxy_env")]
    pub env: BTreeMap<String, String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            home: default_home(),
            entry: default_entry(),
            source: None,
            env: default_proxy_env(),
        }
    }
}

impl ProxySection {
    pub fn home_dir(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.home))
    }

    pub fn source_dir(&self) -> Option<PathBuf> {
        self.source.as_deref().map(|s| PathBuf::from(expand_home(s)))
    }
}

fn default_interpreter() -> String {
    "node".to_string()
}

fn default_version_arg() -> String {
    "--version".to_string()
}

fn default_package_manager() -> String {
    "npm".to_string()
}

fn default_install_args() -> Vec<String> {
    vec!["install".to_string()]
}

fn default_marker() -> String {
    "node_modules".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RuntimeSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Overrides the built-in search list. `*` marks a version-manager
    /// directory, e.g. `~/.nvm/versions/node/*/bin/node`.
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
    #[serde(default = "default_version_arg")]
    pub version_arg: String,
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,
    #[serde(default = "default_marker")]
    pub marker: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            candidates: None,
            version_arg: default_version_arg(),
            package_manager: default_package_manager(),
            install_args: default_install_args(),
            marker: default_marker(),
        }
    }
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_stop_grace_ms() -> u64 {
    5000
}

fn default_kill_wait_ms() -> u64 {
    2000
}

fn default_restart_after_stop_ms() -> u64 {
    7000
}

fn default_restart_after_cleanup_ms() -> u64 {
    2000
}

fn default_restart_after_regenerate_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,
    #[serde(default = "default_restart_after_stop_ms")]
    pub restart_after_stop_ms: u64,
    #[serde(default = "default_restart_after_cleanup_ms")]
    pub restart_after_cleanup_ms: u64,
    #[serde(default = "default_restart_after_regenerate_ms")]
    pub restart_after_regenerate_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            kill_wait_ms: default_kill_wait_ms(),
            restart_after_stop_ms: default_restart_after_stop_ms(),
            restart_after_cleanup_ms: default_restart_after_cleanup_ms(),
            restart_after_regenerate_ms: default_restart_after_regenerate_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    "core".to_string()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

/// One upstream model definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: BTreeMap<String, String>,
}

impl ModelConfig {
    pub fn masked_api_key(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

/// Mask an API key for display: first 4 and last 4 characters survive.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.is_empty() {
        return "(not set)".to_string();
    }
    if chars.len() <= 8 {
        return "••••••••".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}••••{}", prefix, suffix)
}

/// Read-only snapshot handed to the supervisor at launch/restart time.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub models: Vec<ModelConfig>,
}

impl RuntimeConfig {
    pub fn enabled_models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.iter().filter(|m| m.enabled)
    }
}

impl ProxyConfig {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            host: self.proxy.host.clone(),
            port: self.proxy.port,
            env: self.proxy.env.clone(),
            models: self.models.clone(),
        }
    }
}
