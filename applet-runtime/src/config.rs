//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Main configuration struct matching the applet.yml schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub calls: CallsConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,
}

/// External script runtime command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program and arguments, e.g. `["lua", "bridge.lua"]`
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// External remote call command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallsConfig {
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Used when a call carries no `host` override
    #[serde(default)]
    pub default_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_preview_chars")]
    pub args_preview_chars: usize,

    /// Unanswered prompts resolve to deny after this long. No limit when unset.
    #[serde(default)]
    pub prompt_timeout_secs: Option<u64>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            args_preview_chars: default_preview_chars(),
            prompt_timeout_secs: None,
        }
    }
}

fn default_preview_chars() -> usize {
    200
}

/// Settings the app host itself consumes
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub args_preview_chars: usize,
    pub prompt_timeout: Option<Duration>,
    pub default_call_host: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Config::default().host_config()
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, all-default configuration.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            args_preview_chars: self.permissions.args_preview_chars,
            prompt_timeout: self.permissions.prompt_timeout_secs.map(Duration::from_secs),
            default_call_host: self.calls.default_host.clone(),
        }
    }

    /// Runtime command, required before a script can be run
    pub fn runtime_command(&self) -> Result<&[String], ConfigError> {
        if self.runtime.command.is_empty() {
            return Err(ConfigError::MissingField("runtime.command".to_string()));
        }
        Ok(&self.runtime.command)
    }

    pub fn calls_command(&self) -> Result<&[String], ConfigError> {
        if self.calls.command.is_empty() {
            return Err(ConfigError::MissingField("calls.command".to_string()));
        }
        Ok(&self.calls.command)
    }
}
