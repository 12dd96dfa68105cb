// src/fleet/mod.rs
// Lifecycle and reconnection for the whole tool-server fleet

pub mod client;
pub mod config;
pub mod protocol;
pub mod transport;

pub use client::ToolServerClient;
pub use config::{FleetConfig, RetryPolicy, ServerConfig, TransportKind};
pub use protocol::{ToolCallResult, WirePrompt, WireTool};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::{DriftError, ErrorKind, Result};
use crate::retry::{ConnectionStatus, Reconnectable, ReconnectionManager};

/// How long a dispatch waits for a server that is mid-connect
const CONNECTING_WAIT: Duration = Duration::from_secs(2);
const CONNECTING_POLL: Duration = Duration::from_millis(50);

/// One managed server: its client, reconnection manager, and config
pub struct ManagedClient {
    pub client: Arc<ToolServerClient>,
    pub manager: Arc<ReconnectionManager>,
    pub config: ServerConfig,
}

/// Status snapshot for one server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub status: ConnectionStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub tool_count: usize,
}

/// The fleet: every configured tool server, started in parallel with
/// per-server failure isolation.
pub struct Fleet {
    clients: RwLock<HashMap<String, Arc<ManagedClient>>>,
    config_paths: Vec<PathBuf>,
    bus: EventBus,
}

impl Fleet {
    pub fn new(config_paths: Vec<PathBuf>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            config_paths,
            bus,
        })
    }

    /// Start every `enabled` server in parallel. A server that fails to
    /// connect stays registered (disconnected) so later dispatches can
    /// retry it; its failure never blocks the others.
    pub async fn boot(&self) -> Result<()> {
        let config = FleetConfig::load(&self.config_paths).await?;
        let futures: Vec<_> = config
            .servers
            .into_iter()
            .filter(|server| server.enabled)
            .map(|server| self.start_server(server))
            .collect();

        let results = join_all(futures).await;
        let connected = results.iter().filter(|ok| **ok).count();
        info!(
            "[Fleet] Boot complete: {}/{} servers connected",
            connected,
            results.len()
        );
        Ok(())
    }

    async fn start_server(&self, server_config: ServerConfig) -> bool {
        let name = server_config.name.clone();
        let client = ToolServerClient::new(server_config.clone());
        let manager = ReconnectionManager::new(
            name.clone(),
            client.clone() as Arc<dyn Reconnectable>,
            server_config.retry.reconnection_options(),
            self.bus.clone(),
        );

        let managed = Arc::new(ManagedClient {
            client,
            manager: manager.clone(),
            config: server_config,
        });
        self.clients.write().await.insert(name.clone(), managed);

        match manager.start().await {
            Ok(()) => true,
            Err(err) => {
                warn!("[Fleet] Server '{}' failed to start: {}", name, err);
                false
            }
        }
    }

    /// Re-read the config from disk and start servers that were added
    /// since boot. Existing servers are left untouched.
    pub async fn reload(&self) -> Result<Vec<String>> {
        let config = FleetConfig::load(&self.config_paths).await?;
        let known: Vec<String> = self.clients.read().await.keys().cloned().collect();

        let mut added = Vec::new();
        for server in config.servers {
            if server.enabled && !known.contains(&server.name) {
                added.push(server.name.clone());
                self.start_server(server).await;
            }
        }

        if !added.is_empty() {
            info!("[Fleet] Reload added servers: {:?}", added);
        }
        Ok(added)
    }

    /// Tear one server down (best-effort) and recreate it from fresh config
    pub async fn restart(&self, name: &str) -> Result<()> {
        let existing = self.clients.write().await.remove(name);
        if let Some(managed) = existing {
            managed.manager.shutdown().await;
            managed.client.teardown().await;
        }

        let config = FleetConfig::load(&self.config_paths).await?;
        let server = config
            .server(name)
            .cloned()
            .ok_or_else(|| DriftError::not_found(format!("server '{name}' is not configured")))?;

        if !self.start_server(server).await {
            return Err(DriftError::network(format!(
                "server '{name}' failed to restart"
            )));
        }
        Ok(())
    }

    async fn managed(&self, name: &str) -> Result<Arc<ManagedClient>> {
        self.clients
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DriftError::not_found(format!("unknown tool server '{name}'")))
    }

    /// Pre-dispatch guard: connected servers pass through, disconnected or
    /// failed servers get one reconnect cycle, and a server mid-connect is
    /// awaited briefly before re-checking.
    pub async fn ensure_connected(&self, name: &str) -> Result<()> {
        let managed = self.managed(name).await?;

        match managed.manager.status().await {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Connecting => {
                let deadline = tokio::time::Instant::now() + CONNECTING_WAIT;
                while tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(CONNECTING_POLL).await;
                    if managed.manager.status().await == ConnectionStatus::Connected {
                        return Ok(());
                    }
                }
                Err(DriftError::timeout(format!(
                    "server '{name}' is still connecting"
                )))
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => {
                if !managed.config.retry.auto_reconnect {
                    return Err(DriftError::network(format!(
                        "server '{name}' is disconnected and auto-reconnect is off"
                    )));
                }
                debug!("[Fleet] Reconnecting '{}' before dispatch", name);
                managed.manager.trigger_reconnect().await
            }
        }
    }

    /// Call a tool on a specific server, tracking disconnects
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        self.ensure_connected(server).await?;
        let managed = self.managed(server).await?;

        match managed.client.call_tool(tool, arguments).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if matches!(err.kind, ErrorKind::Network | ErrorKind::Transport) {
                    managed.manager.mark_disconnected(&err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    /// Aggregate the tool maps of all currently connected servers,
    /// namespaced `<sanitizedServer>_<sanitizedTool>` → (server, tool).
    pub async fn tools(&self) -> HashMap<String, (String, WireTool)> {
        let clients: Vec<Arc<ManagedClient>> =
            self.clients.read().await.values().cloned().collect();

        let mut aggregated = HashMap::new();
        for managed in clients {
            if managed.manager.status().await != ConnectionStatus::Connected {
                continue;
            }
            let server = managed.client.name().to_string();
            for (tool_name, tool) in managed.client.tools().await {
                let namespaced = format!("{}_{}", sanitize(&server), sanitize(&tool_name));
                aggregated.insert(namespaced, (server.clone(), tool));
            }
        }
        aggregated
    }

    /// Prompt templates across the fleet, tagged by server
    pub async fn list_prompts(&self) -> Vec<(String, WirePrompt)> {
        let clients: Vec<Arc<ManagedClient>> =
            self.clients.read().await.values().cloned().collect();

        let mut prompts = Vec::new();
        for managed in clients {
            if managed.manager.status().await != ConnectionStatus::Connected {
                continue;
            }
            let server = managed.client.name().to_string();
            for prompt in managed.client.list_prompts().await {
                prompts.push((server.clone(), prompt));
            }
        }
        prompts
    }

    pub async fn get_prompt(&self, server: &str, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_connected(server).await?;
        let managed = self.managed(server).await?;
        managed.client.get_prompt(name, arguments).await
    }

    pub async fn status(&self) -> Vec<ServerStatus> {
        let clients: Vec<Arc<ManagedClient>> =
            self.clients.read().await.values().cloned().collect();

        let mut statuses = Vec::new();
        for managed in clients {
            let state = managed.manager.state().await;
            statuses.push(ServerStatus {
                name: managed.client.name().to_string(),
                status: state.status,
                attempts: state.attempts,
                last_error: state.last_error,
                tool_count: managed.client.tools().await.len(),
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn server_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Stop health checks and tear every client down
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<ManagedClient>> =
            self.clients.write().await.drain().map(|(_, c)| c).collect();
        for managed in clients {
            managed.manager.shutdown().await;
            managed.client.teardown().await;
        }
        info!("[Fleet] Shut down");
    }
}

/// File/identifier-safe name fragment, mirroring the enablement sanitizer
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("itsm"), "itsm");
        assert_eq!(sanitize("my server!"), "my_server_");
    }

    #[tokio::test]
    async fn test_unknown_server_is_not_found() {
        let fleet = Fleet::new(Vec::new(), EventBus::new());
        let err = fleet.ensure_connected("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_boot_with_no_config_is_empty() {
        let fleet = Fleet::new(vec![PathBuf::from("/nonexistent.json")], EventBus::new());
        fleet.boot().await.unwrap();
        assert_eq!(fleet.server_count().await, 0);
        assert!(fleet.tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_restart_unconfigured_server_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"{"servers": []}"#).unwrap();

        let fleet = Fleet::new(vec![path], EventBus::new());
        let err = fleet.restart("ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
