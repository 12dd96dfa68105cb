// src/config/mod.rs
// Central configuration for the drift runtime

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fleet::FleetConfig;
use crate::host::{HostConfig, ToolSearchPolicy};

lazy_static! {
    pub static ref CONFIG: DriftConfig = DriftConfig::from_env();
}

/// Process-wide configuration, composed from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub tools: ToolsConfig,
    pub auth: AuthConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("DRIFT_HOST", "127.0.0.1"),
            port: env_parse("DRIFT_PORT", 7420),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Root of all persisted state (sessions, learnings, enabled tools)
    pub root: PathBuf,
    pub default_project: String,
}

impl StateConfig {
    fn from_env() -> Self {
        let root = std::env::var("DRIFT_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".drift")
                    .join("state")
            });
        Self {
            root,
            default_project: env_or("DRIFT_PROJECT", "default"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Lazy mode: deferred tools hidden until enabled (default on)
    pub lazy_tools: bool,
    /// Comma-separated domain allowlist
    pub domain_filter: Option<Vec<String>>,
    /// Session id supplied through the environment
    pub session_id: Option<String>,
}

impl ToolsConfig {
    fn from_env() -> Self {
        let lazy_tools = std::env::var("DRIFT_LAZY_TOOLS")
            .map(|value| value != "0" && value.to_lowercase() != "false")
            .unwrap_or(true);
        let domain_filter = std::env::var("DRIFT_TOOL_DOMAINS").ok().map(|value| {
            value
                .split(',')
                .map(|domain| domain.trim().to_string())
                .filter(|domain| !domain.is_empty())
                .collect()
        });
        Self {
            lazy_tools,
            domain_filter,
            session_id: std::env::var("DRIFT_SESSION_ID").ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            jwt_secret: env_or(
                "DRIFT_JWT_SECRET",
                "drift-jwt-secret-change-in-production",
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub disabled: bool,
}

impl TelemetryConfig {
    fn from_env() -> Self {
        Self {
            endpoint: env_or("DRIFT_TELEMETRY_URL", "https://portal.driftengine.dev/ping"),
            disabled: std::env::var("DRIFT_NO_TELEMETRY").is_ok(),
        }
    }
}

impl DriftConfig {
    pub fn from_env() -> Self {
        // A missing .env file is fine outside development
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig::from_env(),
            state: StateConfig::from_env(),
            tools: ToolsConfig::from_env(),
            auth: AuthConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Host construction parameters derived from this config
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            state_root: self.state.root.clone(),
            default_project: self.state.default_project.clone(),
            lazy_tools: self.tools.lazy_tools,
            domain_filter: self.tools.domain_filter.clone(),
            jwt_secret: self.auth.jwt_secret.clone(),
            env_session: self.tools.session_id.clone(),
            fleet_config_paths: FleetConfig::default_paths(),
            search_policy: ToolSearchPolicy::default(),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Avoid mutating the process env: construct the pieces directly
        let config = DriftConfig::from_env();
        assert!(!config.auth.jwt_secret.is_empty());
        assert!(!config.state.default_project.is_empty());
        assert!(config.server.bind_addr().contains(':'));
    }

    #[test]
    fn test_host_config_mirrors_state() {
        let config = DriftConfig::from_env();
        let host = config.host_config();
        assert_eq!(host.state_root, config.state.root);
        assert_eq!(host.default_project, config.state.default_project);
    }
}
