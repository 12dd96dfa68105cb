// src/tools/builtin/diagnostics.rs
// Operational visibility into the fleet, registry, and search index

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::Result;
use crate::tools::{ExecutionContext, Permission, Role, Tool, ToolDefinition};

pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(FleetStatus::new()),
        Arc::new(RegistryStatistics::new()),
        Arc::new(SearchIndexStatus::new()),
    ]
}

const OPERATOR_ROLES: [Role; 2] = [Role::Developer, Role::Admin];

/// `fleet_status` - connection state per managed tool server
struct FleetStatus {
    definition: ToolDefinition,
}

impl FleetStatus {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "fleet_status".into(),
                description: "Connection status, attempt counts, and tool counts for every managed tool server".into(),
                input_schema: json!({"type": "object", "properties": {}}),
                domain: "diagnostics".into(),
                permission: Permission::Read,
                allowed_roles: OPERATOR_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for FleetStatus {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let fleet = ctx.deps.fleet.read().await.clone();
        match fleet {
            Some(fleet) => {
                let statuses = fleet.status().await;
                Ok(serde_json::to_value(statuses)?)
            }
            None => Ok(json!([])),
        }
    }
}

/// `registry_statistics` - tool counts per domain
struct RegistryStatistics {
    definition: ToolDefinition,
}

impl RegistryStatistics {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "registry_statistics".into(),
                description: "Total registered tools and per-domain counts from the tool registry".into(),
                input_schema: json!({"type": "object", "properties": {}}),
                domain: "diagnostics".into(),
                permission: Permission::Read,
                allowed_roles: OPERATOR_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for RegistryStatistics {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let registry = ctx.deps.registry.read().await.clone();
        match registry {
            Some(registry) => Ok(serde_json::to_value(registry.get_statistics())?),
            None => Ok(json!({"totalTools": 0, "domains": {}})),
        }
    }
}

/// `search_index_status` - availability buckets for the caller's session
struct SearchIndexStatus {
    definition: ToolDefinition,
}

impl SearchIndexStatus {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "search_index_status".into(),
                description: "Availability buckets (available, enabled, deferred) of indexed tools for the caller's session".into(),
                input_schema: json!({"type": "object", "properties": {}}),
                domain: "diagnostics".into(),
                permission: Permission::Read,
                allowed_roles: OPERATOR_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for SearchIndexStatus {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        // Buckets are relative to an empty enabled set when no session is bound
        let enabled = match &ctx.session_id {
            Some(session_id) => ctx.deps.enablement.get_enabled_tools(session_id).await,
            None => Default::default(),
        };
        let report = ctx.deps.index.get_tool_status(&enabled);
        Ok(serde_json::to_value(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::session::SessionManager;
    use crate::tools::{SessionEnablement, ToolDeps, ToolRegistry, ToolSearchIndex};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn context() -> (TempDir, ExecutionContext) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with_debounce(dir.path(), Duration::from_millis(5));
        let index = Arc::new(ToolSearchIndex::new());
        index.index_raw("snow_query_incidents", "Query incidents", "itsm", true);

        let deps = Arc::new(ToolDeps::new(
            store.clone(),
            SessionManager::new(store),
            index,
            Arc::new(SessionEnablement::new(dir.path())),
        ));
        let registry = Arc::new(ToolRegistry::new());
        registry.discover();
        deps.set_registry(registry).await;

        let ctx = ExecutionContext {
            session_id: None,
            project_id: None,
            role: Role::Admin,
            deps,
        };
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_fleet_status_without_fleet_is_empty() {
        let (_dir, ctx) = context().await;
        let result = FleetStatus::new().execute(json!({}), &ctx).await.unwrap();
        assert_eq!(result, json!([]));
    }

    #[tokio::test]
    async fn test_registry_statistics_reports_domains() {
        let (_dir, ctx) = context().await;
        let result = RegistryStatistics::new().execute(json!({}), &ctx).await.unwrap();
        assert!(result["totalTools"].as_u64().unwrap() > 0);
        assert!(result["domains"]["memory"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_search_index_status_buckets() {
        let (_dir, ctx) = context().await;
        let result = SearchIndexStatus::new().execute(json!({}), &ctx).await.unwrap();
        assert!(
            result["deferred"]
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v == "snow_query_incidents")
        );
    }
}
