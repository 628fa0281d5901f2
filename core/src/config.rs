//! Layered configuration loading: CLI flags > environment variables > an
//! optional config file > hard defaults. Invalid configuration fails here,
//! at load time, never deep inside the kernel.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{KernelConfig, Permission};

const ENV_PREFIX: &str = "KESTREL_";

/// Overrides a caller collects from CLI flags; any field left `None` falls
/// through to the environment, then the file, then the default.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_steps: Option<u32>,
    pub max_cost_usd: Option<f64>,
    pub db_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    primary_provider: Option<String>,
    primary_model: Option<String>,
    fallback_provider: Option<String>,
    fallback_model: Option<String>,
    max_steps: Option<u32>,
    max_cost_usd: Option<f64>,
    allowed_permissions: Option<Vec<Permission>>,
    allowed_paths: Option<Vec<PathBuf>>,
    extra_plugin_dirs: Option<Vec<PathBuf>>,
    db_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

/// Resolves a [`KernelConfig`] from every layer and validates the result.
pub fn load(overrides: &CliOverrides) -> Result<KernelConfig, ConfigError> {
    let defaults = KernelConfig::default();
    let file = load_file(overrides.config_file.as_deref())?;
    let env = load_env();

    let config = KernelConfig {
        primary_provider: overrides
            .provider
            .clone()
            .or(env.primary_provider)
            .or(file.primary_provider)
            .unwrap_or(defaults.primary_provider),
        primary_model: overrides
            .model
            .clone()
            .or(env.primary_model)
            .or(file.primary_model)
            .unwrap_or(defaults.primary_model),
        fallback_provider: env.fallback_provider.or(file.fallback_provider).or(defaults.fallback_provider),
        fallback_model: env.fallback_model.or(file.fallback_model).or(defaults.fallback_model),
        max_steps: overrides.max_steps.or(env.max_steps).or(file.max_steps).unwrap_or(defaults.max_steps),
        max_cost_usd: overrides
            .max_cost_usd
            .or(env.max_cost_usd)
            .or(file.max_cost_usd)
            .unwrap_or(defaults.max_cost_usd),
        allowed_permissions: file
            .allowed_permissions
            .map(|v| v.into_iter().collect::<BTreeSet<_>>())
            .unwrap_or(defaults.allowed_permissions),
        allowed_paths: file.allowed_paths.unwrap_or(defaults.allowed_paths),
        extra_plugin_dirs: file.extra_plugin_dirs.unwrap_or(defaults.extra_plugin_dirs),
        db_path: overrides.db_path.clone().or(env.db_path).or(file.db_path).unwrap_or(defaults.db_path),
        log_path: overrides.log_path.clone().or(env.log_path).or(file.log_path).unwrap_or(defaults.log_path),
    };

    config.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(config)
}

fn load_file(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Err(ConfigError::Invalid(format!("config file not found: {}", path.display())));
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid(format!("reading config file: {e}")))?;
    toml_like_to_file_config(&text, path)
}

/// Parses the config file as TOML via `serde` — named for clarity at the
/// call site about what format is accepted.
fn toml_like_to_file_config(text: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Invalid(format!("parsing config file {}: {e}", path.display())))
}

#[derive(Debug, Default)]
struct EnvConfig {
    primary_provider: Option<String>,
    primary_model: Option<String>,
    fallback_provider: Option<String>,
    fallback_model: Option<String>,
    max_steps: Option<u32>,
    max_cost_usd: Option<f64>,
    db_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

fn load_env() -> EnvConfig {
    EnvConfig {
        primary_provider: env_var("PROVIDER"),
        primary_model: env_var("MODEL"),
        fallback_provider: env_var("FALLBACK_PROVIDER"),
        fallback_model: env_var("FALLBACK_MODEL"),
        max_steps: env_var("MAX_STEPS").and_then(|v| v.parse().ok()),
        max_cost_usd: env_var("MAX_COST_USD").and_then(|v| v.parse().ok()),
        db_path: env_var("DB_PATH").map(PathBuf::from),
        log_path: env_var("LOG_PATH").map(PathBuf::from),
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_overridden() {
        let config = load(&CliOverrides::default()).unwrap();
        assert_eq!(config.primary_provider, "ollama");
        assert_eq!(config.max_steps, 20);
    }

    #[test]
    fn cli_override_wins_over_default() {
        let overrides = CliOverrides {
            provider: Some("anthropic".to_string()),
            max_steps: Some(5),
            ..Default::default()
        };
        let config = load(&overrides).unwrap();
        assert_eq!(config.primary_provider, "anthropic");
        assert_eq!(config.max_steps, 5);
    }

    #[test]
    fn invalid_max_steps_is_rejected() {
        let overrides = CliOverrides {
            max_steps: Some(0),
            ..Default::default()
        };
        assert!(load(&overrides).is_err());
    }

    #[test]
    fn missing_config_file_is_rejected() {
        let overrides = CliOverrides {
            config_file: Some(PathBuf::from("/nonexistent/kestrel.toml")),
            ..Default::default()
        };
        assert!(load(&overrides).is_err());
    }
}
