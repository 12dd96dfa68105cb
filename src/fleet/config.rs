// src/fleet/config.rs
// Tool-server fleet configuration, re-read from disk on reload/restart

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::retry::{ReconnectionOptions, RetryOptions};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Post-connect verification window for the server's tool list
pub const VERIFY_TIMEOUT_MS: u64 = 5_000;

/// Retry/reconnect policy for one server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            jitter: true,
            auto_reconnect: true,
            health_check_interval_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    pub fn reconnection_options(&self) -> ReconnectionOptions {
        ReconnectionOptions {
            max_reconnect_attempts: self.max_retries,
            retry: self.retry_options(),
            health_check_interval: self.health_check_interval_ms.map(Duration::from_millis),
        }
    }
}

/// How to reach the server: a spawned child process speaking line-framed
/// JSON on stdio, or a remote streaming-HTTP endpoint with SSE fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportKind {
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Configuration for one managed tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout", rename = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The full fleet configuration file: `{"servers": [...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl FleetConfig {
    /// Read the first existing config file from `paths`. Always hits the
    /// disk so `reload()`/`restart()` observe fresh edits.
    pub async fn load(paths: &[PathBuf]) -> Result<Self> {
        for path in paths {
            if path.exists() {
                info!("[Fleet] Loading server config from {:?}", path);
                return Self::load_file(path).await;
            }
        }
        debug!("[Fleet] No server config file found, starting with an empty fleet");
        Ok(Self::default())
    }

    pub async fn load_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: FleetConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Default search order: project config first, then the user's
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".drift").join("servers.json"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".drift").join("servers.json"));
        }
        paths
    }
}
