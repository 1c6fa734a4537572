//! Configuration loader and validator for the feed promotion job.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Unknown loader: {0}")]
    UnknownLoader(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub translations: Translations,
    pub loaders: BTreeMap<String, Loader>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub log_dir: String,
    pub batch_size: u32,
    pub pace_seconds: u64,
}

/// Translation catalog location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Translations {
    pub catalog: String,
}

/// Destination-system connection for one named loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Loader {
    pub kind: LoaderKind,
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    Http,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and
    /// `app.log_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if !self.app.log_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.log_dir)?;
        }
        Ok(())
    }

    /// Look up a loader connection by name.
    pub fn loader(&self, name: &str) -> Result<&Loader, ConfigError> {
        self.loaders
            .get(name)
            .ok_or_else(|| ConfigError::UnknownLoader(name.to_string()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.log_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.log_dir must be non-empty"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }
    // pace_seconds is u64; zero means no pause between batches

    if cfg.translations.catalog.trim().is_empty() {
        return Err(ConfigError::Invalid("translations.catalog must be non-empty"));
    }

    if cfg.loaders.is_empty() {
        return Err(ConfigError::Invalid("loaders must declare at least one entry"));
    }
    for loader in cfg.loaders.values() {
        if loader.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("loaders.*.base_url must be non-empty"));
        }
        if loader.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("loaders.*.api_key must be non-empty"));
        }
        if loader.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("loaders.*.timeout_seconds must be > 0"));
        }
    }

    Ok(())
}

/// Returns an example YAML document matching the schema.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  log_dir: "./data/logs"
  batch_size: 100
  pace_seconds: 0

translations:
  catalog: "./config/translations.yaml"

loaders:
  anunico:
    kind: http
    base_url: "https://loader.anunico.example/"
    api_key: "YOUR_LOADER_API_KEY"
    timeout_seconds: 30
"#
}
