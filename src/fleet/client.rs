// src/fleet/client.rs
// One connected tool server: transport, request pairing, discovered tools

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::{ServerConfig, TransportKind, VERIFY_TIMEOUT_MS};
use super::protocol::{JsonRpcRequest, JsonRpcResponse, ToolCallResult, WirePrompt, WireTool, methods};
use super::transport::{HttpTransport, ServerTransport, SseTransport, StdioTransport};
use crate::error::{DriftError, Result, classify_rpc};
use crate::retry::Reconnectable;

struct ClientInner {
    transport: Arc<dyn ServerTransport>,
    tools: HashMap<String, WireTool>,
}

/// Client for a single configured tool server. `establish()` builds the
/// transport, verifies the server by fetching its tool list within the
/// verification window, and caches the discovered tools.
pub struct ToolServerClient {
    config: ServerConfig,
    request_id: AtomicI64,
    inner: RwLock<Option<ClientInner>>,
}

impl ToolServerClient {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            request_id: AtomicI64::new(0),
            inner: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|inner| inner.transport.is_connected())
            .unwrap_or(false)
    }

    /// Tools discovered at the last successful connect
    pub async fn tools(&self) -> HashMap<String, WireTool> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|inner| inner.tools.clone())
            .unwrap_or_default()
    }

    /// Connect (tearing down any previous transport) and verify
    pub async fn establish(&self) -> Result<()> {
        self.teardown().await;

        let transport: Arc<dyn ServerTransport> = match &self.config.transport {
            TransportKind::Local { command, args, env } => {
                info!("[Fleet] Spawning local server '{}': {}", self.config.name, command);
                Arc::new(StdioTransport::spawn(command, args, env).await?)
            }
            TransportKind::Remote { url, headers } => {
                self.connect_remote(url, headers).await?
            }
        };

        // Verification: the server must answer tools.list promptly
        let tools = match self.fetch_tools(&transport).await {
            Ok(tools) => tools,
            Err(err) => {
                transport.close().await;
                return Err(err);
            }
        };

        info!(
            "[Fleet] Server '{}' verified with {} tools",
            self.config.name,
            tools.len()
        );
        *self.inner.write().await = Some(ClientInner { transport, tools });
        Ok(())
    }

    /// Remote connect: probe streaming HTTP first, fall back to SSE. URLs
    /// that already point at an SSE endpoint skip the probe.
    async fn connect_remote(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Arc<dyn ServerTransport>> {
        if !url.trim_end_matches('/').ends_with("/sse") {
            let http = Arc::new(HttpTransport::new(url, headers, self.config.timeout()));
            match self.fetch_tools(&(http.clone() as Arc<dyn ServerTransport>)).await {
                Ok(_) => {
                    debug!("[Fleet] '{}' negotiated streaming HTTP", self.config.name);
                    return Ok(http);
                }
                Err(err) => {
                    debug!(
                        "[Fleet] '{}' HTTP probe failed ({}), falling back to SSE",
                        self.config.name, err
                    );
                }
            }
        }

        let sse = SseTransport::new(url, headers, self.config.timeout());
        sse.start().await?;
        Ok(Arc::new(sse))
    }

    async fn fetch_tools(
        &self,
        transport: &Arc<dyn ServerTransport>,
    ) -> Result<HashMap<String, WireTool>> {
        let result = self
            .request_on(
                transport,
                methods::TOOLS_LIST,
                None,
                Duration::from_millis(VERIFY_TIMEOUT_MS),
            )
            .await?;

        let mut tools = HashMap::new();
        if let Some(list) = result.get("tools").and_then(|t| t.as_array()) {
            for value in list {
                match serde_json::from_value::<WireTool>(value.clone()) {
                    Ok(tool) => {
                        tools.insert(tool.name.clone(), tool);
                    }
                    Err(err) => warn!(
                        "[Fleet] '{}' advertised an undecodable tool: {}",
                        self.config.name, err
                    ),
                }
            }
        }
        Ok(tools)
    }

    /// Drop the transport; the server process (if local) is killed
    pub async fn teardown(&self) {
        if let Some(inner) = self.inner.write().await.take() {
            inner.transport.close().await;
        }
    }

    async fn transport(&self) -> Result<Arc<dyn ServerTransport>> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|inner| inner.transport.clone())
            .ok_or_else(|| {
                DriftError::network(format!("server '{}' is not connected", self.config.name))
            })
    }

    /// Issue one JSON-RPC request over the current transport
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let transport = self.transport().await?;
        self.request_on(&transport, method, params, self.config.timeout())
            .await
    }

    async fn request_on(
        &self,
        transport: &Arc<dyn ServerTransport>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request)?;

        debug!("[Fleet:{}] -> {} (id={})", self.config.name, method, id);
        let response_json = tokio::time::timeout(timeout, transport.send(&request_json))
            .await
            .map_err(|_| {
                DriftError::timeout(format!(
                    "server '{}' did not answer {method} within {timeout:?}",
                    self.config.name
                ))
            })??;

        let response: JsonRpcResponse = serde_json::from_str(&response_json)?;
        if let Some(error) = response.error {
            return Err(classify_rpc(error.code, &error.message));
        }
        if response.id != Some(id) {
            return Err(DriftError::transport(format!(
                "response id {:?} does not match request id {id}",
                response.id
            )));
        }
        response
            .result
            .ok_or_else(|| DriftError::transport("response carried neither result nor error"))
    }

    /// `tools.call {name, arguments}`
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        let result = self
            .request(
                methods::TOOLS_CALL,
                Some(json!({"name": tool, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `prompts.list`, fetched lazily (servers without prompt support
    /// simply answer with an error, surfaced as an empty list)
    pub async fn list_prompts(&self) -> Vec<WirePrompt> {
        match self.request(methods::PROMPTS_LIST, None).await {
            Ok(result) => result
                .get("prompts")
                .and_then(|p| p.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|value| serde_json::from_value(value.clone()).ok())
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                debug!("[Fleet:{}] No prompts: {}", self.config.name, err);
                Vec::new()
            }
        }
    }

    /// `prompts.get {name, arguments}`
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            methods::PROMPTS_GET,
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }
}

#[async_trait]
impl Reconnectable for ToolServerClient {
    async fn connect(&self) -> Result<()> {
        self.establish().await
    }

    async fn health_check(&self) -> Result<()> {
        let transport = self.transport().await?;
        self.request_on(
            &transport,
            methods::TOOLS_LIST,
            None,
            Duration::from_millis(VERIFY_TIMEOUT_MS),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::config::RetryPolicy;

    fn local_config(command: &str) -> ServerConfig {
        ServerConfig {
            name: "stub".into(),
            transport: TransportKind::Local {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
            },
            enabled: true,
            timeout_ms: 2_000,
            retry: RetryPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_unconnected_client_reports_network_error() {
        let client = ToolServerClient::new(local_config("unused"));
        let err = client.request(methods::TOOLS_LIST, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Network);
        assert!(!client.is_connected().await);
        assert!(client.tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_establish_fails_against_non_server() {
        // `cat` echoes the request back; the echoed request has no result
        // field, so verification must fail and tear the transport down.
        let client = ToolServerClient::new(local_config("cat"));
        if StdioTransport::spawn("cat", &[], &HashMap::new()).await.is_err() {
            return;
        }
        assert!(client.establish().await.is_err());
        assert!(!client.is_connected().await);
    }
}
