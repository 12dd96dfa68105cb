// src/tools/mod.rs
// Tool definitions, the execution capability, and role/permission types

pub mod builtin;
pub mod enablement;
pub mod registry;
pub mod search;

pub use enablement::SessionEnablement;
pub use registry::{DiscoveryReport, ToolRegistry};
pub use search::{ToolIndexEntry, ToolSearchIndex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{DriftError, Result};
use crate::memory::MemoryStore;
use crate::session::SessionManager;

/// Caller roles recognized by the permission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Stakeholder,
    Developer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Stakeholder => "stakeholder",
            Role::Developer => "developer",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stakeholder" => Some(Role::Stakeholder),
            "developer" => Some(Role::Developer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Developer
    }
}

/// Permission class of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

/// Definition of a registered tool; unique by name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub domain: String,
    pub permission: Permission,
    pub allowed_roles: Vec<Role>,
}

impl ToolDefinition {
    /// Write and admin permissions never reach stakeholders, regardless of
    /// what the definition claims.
    pub fn role_allowed(&self, role: Role) -> bool {
        if role == Role::Stakeholder && self.permission != Permission::Read {
            return false;
        }
        self.allowed_roles.contains(&role)
    }
}

/// Shared handles available to tool implementations
pub struct ToolDeps {
    pub memory: MemoryStore,
    pub sessions: SessionManager,
    pub fleet: tokio::sync::RwLock<Option<Arc<crate::fleet::Fleet>>>,
    pub registry: tokio::sync::RwLock<Option<Arc<ToolRegistry>>>,
    pub index: Arc<ToolSearchIndex>,
    pub enablement: Arc<SessionEnablement>,
}

impl ToolDeps {
    pub fn new(
        memory: MemoryStore,
        sessions: SessionManager,
        index: Arc<ToolSearchIndex>,
        enablement: Arc<SessionEnablement>,
    ) -> Self {
        Self {
            memory,
            sessions,
            fleet: tokio::sync::RwLock::new(None),
            registry: tokio::sync::RwLock::new(None),
            index,
            enablement,
        }
    }

    pub async fn set_fleet(&self, fleet: Arc<crate::fleet::Fleet>) {
        *self.fleet.write().await = Some(fleet);
    }

    pub async fn set_registry(&self, registry: Arc<ToolRegistry>) {
        *self.registry.write().await = Some(registry);
    }
}

/// Per-call execution context
#[derive(Clone)]
pub struct ExecutionContext {
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub role: Role,
    pub deps: Arc<ToolDeps>,
}

impl ExecutionContext {
    /// Session id, or a `Validation` error for tools that require one
    pub fn require_session(&self) -> Result<&str> {
        self.session_id
            .as_deref()
            .ok_or_else(|| DriftError::validation("this tool requires a session id"))
    }

    pub fn project_or_default(&self) -> &str {
        self.project_id.as_deref().unwrap_or("default")
    }
}

/// Capability set every tool implements: argument validation + execution.
/// Definitions are fixed at discovery; no reflection happens at call time.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    /// Schema-driven check of required fields; override for custom rules
    fn validate_args(&self, args: &Value) -> Result<()> {
        validate_required_args(&self.definition().input_schema, args)
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value>;
}

/// Check that every `required` property of a JSON schema is present
pub fn validate_required_args(schema: &Value, args: &Value) -> Result<()> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    for field in required.iter().filter_map(|f| f.as_str()) {
        if args.get(field).is_none() {
            return Err(DriftError::validation(format!(
                "missing required argument '{field}'"
            )));
        }
    }
    Ok(())
}
