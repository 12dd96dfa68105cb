// src/host/mod.rs
// Unified tool host: lists and executes tools behind permission, lazy
// exposure, and session-enablement gates

pub mod auth;
pub mod meta;
pub mod observe;
pub mod rpc;

pub use auth::CallerContext;
pub use meta::{TOOL_EXECUTE, TOOL_SEARCH, ToolSearchPolicy};

use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bus::{BusEvent, EventBus};
use crate::error::{DriftError, Result};
use crate::fleet::protocol::ToolCallResult;
use crate::fleet::{Fleet, FleetConfig, WirePrompt};
use crate::memory::MemoryStore;
use crate::retry::RetryOptions;
use crate::session::SessionManager;
use crate::tools::{
    ExecutionContext, Role, SessionEnablement, Tool, ToolDeps, ToolRegistry, ToolSearchIndex,
};

/// Prefix list of read-only, idempotent operations eligible for retries
const IDEMPOTENT_MARKERS: &[&str] = &[
    "get", "list", "query", "search", "read", "status", "export", "ancestry", "tree", "fetch",
];

/// Host construction parameters
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub state_root: PathBuf,
    pub default_project: String,
    /// Lazy mode (default on): deferred tools stay hidden until enabled
    pub lazy_tools: bool,
    /// Comma-separated domain allowlist, already split
    pub domain_filter: Option<Vec<String>>,
    pub jwt_secret: String,
    /// Session id supplied through the environment
    pub env_session: Option<String>,
    pub fleet_config_paths: Vec<PathBuf>,
    pub search_policy: ToolSearchPolicy,
}

impl HostConfig {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            default_project: "default".to_string(),
            lazy_tools: true,
            domain_filter: None,
            jwt_secret: "drift-jwt-secret-change-in-production".to_string(),
            env_session: None,
            fleet_config_paths: FleetConfig::default_paths(),
            search_policy: ToolSearchPolicy::default(),
        }
    }
}

/// What a caller sees in `tools/list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The unified tool host. Owns the registry, search index, enablement
/// state, and the fleet; request handlers receive a shared handle.
pub struct UnifiedToolHost {
    config: HostConfig,
    registry: Arc<ToolRegistry>,
    index: Arc<ToolSearchIndex>,
    enablement: Arc<SessionEnablement>,
    fleet: Arc<Fleet>,
    memory: MemoryStore,
    deps: Arc<ToolDeps>,
    bus: EventBus,
}

impl UnifiedToolHost {
    /// Build the host: discover and index builtin tools, boot the fleet,
    /// and index its tools. Fleet servers that fail to connect stay
    /// registered for later reconnection.
    pub async fn initialize(config: HostConfig) -> Result<Arc<Self>> {
        let bus = EventBus::new();
        let memory = MemoryStore::new(&config.state_root);
        let sessions = SessionManager::new(memory.clone());
        let index = Arc::new(ToolSearchIndex::new());
        let enablement = Arc::new(SessionEnablement::new(&config.state_root));
        let deps = Arc::new(ToolDeps::new(
            memory.clone(),
            sessions,
            index.clone(),
            enablement.clone(),
        ));

        let registry = Arc::new(ToolRegistry::new());
        let report = registry.discover();
        if !report.errors.is_empty() {
            warn!("[Host] Discovery reported {} errors", report.errors.len());
        }
        deps.set_registry(registry.clone()).await;

        // Everything in the registry is deferred under lazy mode
        for definition in registry.get_tool_definitions() {
            index.index_tool(&definition, true);
        }

        let fleet = Fleet::new(config.fleet_config_paths.clone(), bus.clone());
        fleet.boot().await?;
        deps.set_fleet(fleet.clone()).await;

        for (namespaced, (server, tool)) in fleet.tools().await {
            index.index_raw(
                &namespaced,
                tool.description.as_deref().unwrap_or(&tool.name),
                &server,
                true,
            );
        }

        info!(
            "[Host] Initialized with {} registry tools and {} fleet servers",
            registry.count(),
            fleet.server_count().await
        );

        Ok(Arc::new(Self {
            config,
            registry,
            index,
            enablement,
            fleet,
            memory,
            deps,
            bus,
        }))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &Arc<ToolSearchIndex> {
        &self.index
    }

    pub fn enablement(&self) -> &Arc<SessionEnablement> {
        &self.enablement
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub async fn shutdown(&self) {
        self.fleet.shutdown().await;
        if let Err(err) = self.memory.flush_all().await {
            warn!("[Host] Memory flush on shutdown failed: {}", err);
        }
        info!("[Host] Shut down");
    }

    /// Session resolution order: request header / token (already merged
    /// into the caller), then the environment, then the broadcast file.
    pub async fn resolve_session(&self, caller: &CallerContext) -> Option<String> {
        if let Some(session) = &caller.session_id {
            return Some(session.clone());
        }
        if let Some(session) = &self.config.env_session {
            return Some(session.clone());
        }
        self.enablement.current_session().await
    }

    // === list-tools ===

    pub async fn list_tools(&self, caller: &CallerContext) -> Vec<ToolDescriptor> {
        let session_id = self.resolve_session(caller).await;
        let enabled = match &session_id {
            Some(session) => self.enablement.get_enabled_tools(session).await,
            None => Default::default(),
        };

        let mut descriptors = Vec::new();

        // Registry tools, domain- and role-filtered
        let definitions = match &self.config.domain_filter {
            Some(domains) => {
                let known = self.registry.get_available_domains();
                for domain in domains {
                    if !known.contains(domain) {
                        warn!("[Host] Domain filter names unknown domain '{}'", domain);
                    }
                }
                self.registry.get_tool_definitions_by_domains(domains)
            }
            None => self.registry.get_tool_definitions(),
        };

        for definition in definitions {
            if !definition.role_allowed(caller.role) {
                continue;
            }
            if self.config.lazy_tools
                && self.index.is_deferred(&definition.name)
                && !enabled.contains(&definition.name)
            {
                continue;
            }
            descriptors.push(ToolDescriptor {
                name: definition.name.clone(),
                description: definition.description.clone(),
                input_schema: definition.input_schema.clone(),
            });
        }

        // Fleet tools, treated as developer/admin surface
        if caller.role != Role::Stakeholder {
            for (namespaced, (_server, tool)) in self.fleet.tools().await {
                if let Some(domains) = &self.config.domain_filter {
                    if !domains.iter().any(|d| namespaced.starts_with(d.as_str())) {
                        continue;
                    }
                }
                if self.config.lazy_tools
                    && self.index.is_deferred(&namespaced)
                    && !enabled.contains(&namespaced)
                {
                    continue;
                }
                descriptors.push(ToolDescriptor {
                    name: namespaced.clone(),
                    description: tool.description.clone().unwrap_or_default(),
                    input_schema: tool
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                });
            }
        }

        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        // Meta tools are always exposed, ahead of the rest
        let mut all = meta::meta_tool_descriptors();
        all.extend(descriptors);
        all
    }

    // === call-tool ===

    pub async fn call_tool(
        &self,
        caller: &CallerContext,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let session_id = self.resolve_session(caller).await;
        info!(
            "[Host] tools/call {} {}",
            name,
            observe::summarize_args(&arguments)
        );

        match name {
            meta::TOOL_SEARCH => self.tool_search(caller, &session_id, arguments).await,
            meta::TOOL_EXECUTE => self.tool_execute(caller, &session_id, arguments).await,
            _ => {
                self.dispatch_tool(caller, &session_id, name, arguments, true)
                    .await
            }
        }
    }

    /// The shared pipeline behind direct calls and `tool_execute`. With
    /// `enforce_enablement`, a deferred tool that is not enabled for the
    /// session is rejected with the search instruction.
    async fn dispatch_tool(
        &self,
        caller: &CallerContext,
        session_id: &Option<String>,
        name: &str,
        arguments: Value,
        enforce_enablement: bool,
    ) -> Result<ToolCallResult> {
        if enforce_enablement && self.config.lazy_tools {
            let callable = match session_id {
                Some(session) => {
                    self.enablement
                        .can_execute_tool(session, name, &self.index)
                        .await
                }
                None => !self.index.is_deferred(name),
            };
            if !callable {
                return Err(DriftError::forbidden(format!(
                    "Tool '{name}' is not enabled for this session. Call tool_search to \
                     discover it and enable it, or invoke it through tool_execute."
                )));
            }
        }

        caller.check_expiry()?;

        if let Some(tool) = self.registry.get_tool(name) {
            return self
                .run_registry_tool(caller, session_id, tool, arguments)
                .await;
        }

        // Namespaced fleet tool
        if let Some((server, tool_name)) = self.resolve_fleet_tool(name).await {
            if caller.role == Role::Stakeholder {
                return Err(DriftError::forbidden(format!(
                    "role 'stakeholder' may not call tool '{name}'"
                )));
            }
            return self
                .execute_with_retry(name, || {
                    let arguments = arguments.clone();
                    let server = server.clone();
                    let tool_name = tool_name.clone();
                    async move { self.fleet.call_tool(&server, &tool_name, arguments).await }
                })
                .await;
        }

        Err(DriftError::not_found(format!("tool '{name}' not found")))
    }

    async fn run_registry_tool(
        &self,
        caller: &CallerContext,
        session_id: &Option<String>,
        tool: Arc<dyn Tool>,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let definition = tool.definition();
        if !definition.role_allowed(caller.role) {
            return Err(DriftError::forbidden(format!(
                "role '{}' may not call tool '{}'",
                caller.role.as_str(),
                definition.name
            )));
        }

        tool.validate_args(&arguments)?;

        let ctx = ExecutionContext {
            session_id: session_id.clone(),
            project_id: Some(self.config.default_project.clone()),
            role: caller.role,
            deps: self.deps.clone(),
        };

        let name = definition.name.clone();
        let value = self
            .execute_with_retry(&name, || {
                let arguments = arguments.clone();
                let ctx = ctx.clone();
                let tool = tool.clone();
                async move {
                    tool.execute(arguments, &ctx)
                        .await
                        .map(|value| ToolCallResult::from_json(&value))
                }
            })
            .await?;
        Ok(value)
    }

    /// Retry wrapper: only the stable idempotent read operations are
    /// retried, and only on retryable error kinds.
    async fn execute_with_retry<F, Fut>(&self, name: &str, op: F) -> Result<ToolCallResult>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<ToolCallResult>>,
    {
        let retry_allowed = is_idempotent(name);
        let options = RetryOptions {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5_000),
            backoff_factor: 2.0,
            jitter: true,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) if retry_allowed && err.is_retryable() && attempt < options.max_retries => {
                    let delay = options.delay_for_attempt(attempt);
                    warn!(
                        "[Host] Retrying '{}' after {:?} (attempt {}): {}",
                        name, delay, attempt, err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn resolve_fleet_tool(&self, namespaced: &str) -> Option<(String, String)> {
        self.fleet
            .tools()
            .await
            .get(namespaced)
            .map(|(server, tool)| (server.clone(), tool.name.clone()))
    }

    // === meta tools ===

    /// `tool_search(query, limit?)`: scored matches plus their status for
    /// the caller's session. Auto-enable of top hits is policy-driven and
    /// off by default.
    async fn tool_search(
        &self,
        _caller: &CallerContext,
        session_id: &Option<String>,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let query = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| DriftError::validation("tool_search requires a 'query' argument"))?;
        let limit = arguments
            .get("limit")
            .and_then(|l| l.as_u64())
            .map(|l| l as usize)
            .unwrap_or(meta::DEFAULT_SEARCH_LIMIT);

        let hits = self.index.search(query, limit);

        if let (ToolSearchPolicy::AutoEnableTop(count), Some(session)) =
            (self.config.search_policy, session_id.as_deref())
        {
            let top: Vec<String> = hits
                .iter()
                .take(count)
                .filter(|hit| hit.entry.deferred)
                .map(|hit| hit.entry.id.clone())
                .collect();
            if !top.is_empty() {
                self.enablement.enable_tools(session, &top).await?;
                for tool in &top {
                    self.bus.publish(BusEvent::ToolEnabled {
                        session_id: session.to_string(),
                        tool: tool.clone(),
                    });
                }
            }
        }

        let enabled = match session_id {
            Some(session) => self.enablement.get_enabled_tools(session).await,
            None => Default::default(),
        };

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                let status = if !hit.entry.deferred {
                    "available"
                } else if enabled.contains(&hit.entry.id) {
                    "enabled"
                } else {
                    "deferred"
                };
                json!({
                    "id": hit.entry.id,
                    "description": hit.entry.description,
                    "category": hit.entry.category,
                    "score": hit.score,
                    "status": status,
                })
            })
            .collect();

        Ok(ToolCallResult::from_json(&json!({
            "query": query,
            "results": results,
            "sessionId": session_id,
        })))
    }

    /// `tool_execute({tool, arguments})`: enable the tool for the session
    /// if it is deferred, then run it through the standard pipeline.
    async fn tool_execute(
        &self,
        caller: &CallerContext,
        session_id: &Option<String>,
        arguments: Value,
    ) -> Result<ToolCallResult> {
        let tool = arguments
            .get("tool")
            .and_then(|t| t.as_str())
            .ok_or_else(|| DriftError::validation("tool_execute requires a 'tool' argument"))?
            .to_string();
        let tool_args = arguments
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        if meta::is_meta_tool(&tool) {
            return Err(DriftError::validation(
                "tool_execute cannot invoke the meta tools",
            ));
        }

        if self.index.is_deferred(&tool) {
            if let Some(session) = session_id.as_deref() {
                self.enablement.enable_tool(session, &tool).await?;
                self.bus.publish(BusEvent::ToolEnabled {
                    session_id: session.to_string(),
                    tool: tool.clone(),
                });
            }
        }

        self.dispatch_tool(caller, session_id, &tool, tool_args, false)
            .await
    }

    // === prompts ===

    pub async fn list_prompts(&self) -> Vec<(String, WirePrompt)> {
        self.fleet.list_prompts().await
    }

    pub async fn get_prompt(&self, server: &str, name: &str, arguments: Value) -> Result<Value> {
        self.fleet.get_prompt(server, name, arguments).await
    }
}

/// Stable check for the read-only idempotent operations the host may retry
fn is_idempotent(name: &str) -> bool {
    name.split('_')
        .any(|segment| IDEMPOTENT_MARKERS.contains(&segment))
}
