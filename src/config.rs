//! Configuration loader and validator for the portfolio site.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub arena: Arena,
    #[serde(default)]
    pub app: App,
}

/// Are.na connection settings. An empty access token means requests go
/// out unauthenticated and see only publicly visible data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Arena {
    #[serde(default)]
    pub access_token: String,
    pub group_slug: String,
    /// Default group attached to newly created channels.
    #[serde(default)]
    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for App {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

impl Config {
    /// Token as an option: empty means unauthenticated.
    pub fn token(&self) -> Option<String> {
        let token = self.arena.access_token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.app.cache_ttl_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - `ARENA_ACCESS_TOKEN` in the environment overrides the file's token.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    if let Ok(token) = std::env::var("ARENA_ACCESS_TOKEN") {
        if !token.trim().is_empty() {
            cfg.arena.access_token = token;
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.arena.group_slug.trim().is_empty() {
        return Err(ConfigError::Invalid("arena.group_slug must be non-empty"));
    }
    if cfg.app.cache_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.cache_ttl_seconds must be > 0"));
    }
    Ok(())
}

/// Canonical example configuration.
pub fn example() -> &'static str {
    r#"arena:
  access_token: ""
  group_slug: "numan-studio"
  group_id: 36176

app:
  cache_ttl_seconds: 300
"#
}
