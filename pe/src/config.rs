//! prompt-engine configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::mcp::ServerOptions;
use crate::watcher::WatcherConfig;

/// Directory served when neither the CLI, the environment nor a config file names one
pub const DEFAULT_PROMPTS_DIR: &str = "./prompts";

/// Main prompt-engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the `.tmpl` files
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: PathBuf,

    /// Decode request arguments as JSON before rendering
    #[serde(rename = "json-args")]
    pub json_args: bool,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[serde(rename = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Identity reported to MCP clients
    pub server: ServerConfig,

    /// Directory watching
    pub watch: WatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompts_dir: PathBuf::from(DEFAULT_PROMPTS_DIR),
            json_args: true,
            log_level: None,
            log_file: None,
            server: ServerConfig::default(),
            watch: WatcherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .prompt-engine.yml
        let local_config = PathBuf::from(".prompt-engine.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/prompt-engine/prompt-engine.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("prompt-engine").join("prompt-engine.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Server options with the CLI's json-args switch applied
    pub fn server_options(&self, disable_json_args: bool) -> ServerOptions {
        ServerOptions {
            name: self.server.name.clone(),
            version: self.server.version.clone(),
            json_args: self.json_args && !disable_json_args,
        }
    }
}

/// Identity reported in the MCP initialize handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = ServerOptions::default();
        Self {
            name: defaults.name,
            version: defaults.version,
        }
    }
}
