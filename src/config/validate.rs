// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::HashSet;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::model::ProxyConfig;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ConfigDiagnostic {
    #[error("proxy port must be a positive integer")]
    #[diagnostic(code(proxyme::invalid_port), help("set [proxy].port to a value between 1 and 65535"))]
    InvalidPort,

    #[error("proxy host is empty")]
    #[diagnostic(code(proxyme::empty_host), help("use \"localhost\" unless the proxy binds elsewhere"))]
    EmptyHost,

    #[error("proxy entry script is empty")]
    #[diagnostic(code(proxyme::empty_entry))]
    EmptyEntry,

    #[error("model name `{name}` is defined more than once")]
    #[diagnostic(code(proxyme::duplicate_model))]
    DuplicateModel { name: String },

    #[error("model `{name}` has an empty name or provider")]
    #[diagnostic(code(proxyme::incomplete_model))]
    IncompleteModel { name: String },

    #[error("model `{name}` is enabled but has no endpoint")]
    #[diagnostic(code(proxyme::missing_endpoint))]
    MissingEndpoint { name: String },

    #[error("model `{name}` has temperature {value}, outside 0.0..=2.0")]
    #[diagnostic(code(proxyme::invalid_temperature))]
    InvalidTemperature { name: String, value: f64 },

    #[error("timing `{field}` must be greater than zero")]
    #[diagnostic(code(proxyme::zero_timing))]
    ZeroTiming { field: &'static str },
}

/// Validate a parsed config, collecting every problem rather than stopping
/// at the first.
pub fn validate(config: &ProxyConfig) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();

    if config.proxy.port == 0 {
        errors.push(ConfigDiagnostic::InvalidPort);
    }
    if config.proxy.host.trim().is_empty() {
        errors.push(ConfigDiagnostic::EmptyHost);
    }
    if config.proxy.entry.trim().is_empty() {
        errors.push(ConfigDiagnostic::EmptyEntry);
    }

    let mut seen = HashSet::new();
    for model in &config.models {
        if model.name.trim().is_empty() || model.provider.trim().is_empty() {
            errors.push(ConfigDiagnostic::IncompleteModel {
                name: model.name.clone(),
            });
        }
        if !seen.insert(model.name.as_str()) {
            errors.push(ConfigDiagnostic::DuplicateModel {
                name: model.name.clone(),
            });
        }
        if model.enabled && model.endpoint.trim().is_empty() {
            errors.push(ConfigDiagnostic::MissingEndpoint {
                name: model.name.clone(),
            });
        }
        if !(0.0..=2.0).contains(&model.temperature) {
            errors.push(ConfigDiagnostic::InvalidTemperature {
                name: model.name.clone(),
                value: model.temperature,
            });
        }
    }

    let timing = &config.timing;
    for (field, value) in [
        ("settle_ms", timing.settle_ms),
        ("probe_timeout_ms", timing.probe_timeout_ms),
        ("stop_grace_ms", timing.stop_grace_ms),
    ] {
        if value == 0 {
            errors.push(ConfigDiagnostic::ZeroTiming { field });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
