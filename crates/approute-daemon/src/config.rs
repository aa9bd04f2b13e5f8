//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use approute_core::{Blacklist, RetryPolicy};
use approute_pipewire::loopback::default_discovery_policy;
use approute_pipewire::{GraphConfig, LoopbackProps, RouterConfig, ToolPaths};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// PipeWire tool locations
    #[serde(default)]
    pub tools: ToolPaths,
    /// Nodes hidden from routing
    #[serde(default)]
    pub blacklist: Blacklist,
    /// Retry budget for the object dump
    #[serde(default = "default_dump_retry")]
    pub dump_retry: RetryPolicy,
    /// Budget for waiting on a new virtual sink's nodes
    #[serde(default = "default_discovery_policy")]
    pub discovery: RetryPolicy,
    /// Virtual sink properties
    #[serde(default)]
    pub loopback: LoopbackProps,
    /// Routes opened at startup
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            tools: ToolPaths::default(),
            blacklist: Blacklist::default(),
            dump_retry: default_dump_retry(),
            discovery: default_discovery_policy(),
            loopback: LoopbackProps::default(),
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Settings for the router.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            graph: GraphConfig { blacklist: self.blacklist.clone(), dump_retry: self.dump_retry },
            loopback: self.loopback.clone(),
            discovery: self.discovery,
        }
    }

    /// Period of the rule loop.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.refresh_interval_ms.max(MIN_REFRESH_INTERVAL_MS))
    }
}

const MIN_REFRESH_INTERVAL_MS: u64 = 100;

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Milliseconds between rule passes
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval_ms() -> u64 {
    2000
}

fn default_dump_retry() -> RetryPolicy {
    GraphConfig::default().dump_retry
}

/// A route opened at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Name used in logs
    pub name: String,
    /// Applications fed into the route, matched on application or node name
    #[serde(default)]
    pub apps: Vec<String>,
    /// `node.name` of the sink the route plays into. That sink receives
    /// only this route's audio while bound.
    #[serde(default)]
    pub target: Option<String>,
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Load configuration from a specific file, falling back to defaults if it
/// does not exist.
pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        Ok(config)
    } else {
        info!(config_path = %config_path.display(), "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("org", "approute", "approute").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
