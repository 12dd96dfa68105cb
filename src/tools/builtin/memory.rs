// src/tools/builtin/memory.rs
// Tools exposing session memory to agents

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::Result;
use crate::memory::export::export_as_markdown;
use crate::memory::Learning;
use crate::tools::{ExecutionContext, Permission, Role, Tool, ToolDefinition};

pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SessionStatus::new()),
        Arc::new(AddLearning::new()),
        Arc::new(AddKeyResult::new()),
        Arc::new(ReadWorkLog::new()),
        Arc::new(ExportMemory::new()),
    ]
}

const ALL_ROLES: [Role; 3] = [Role::Stakeholder, Role::Developer, Role::Admin];
const WRITER_ROLES: [Role; 2] = [Role::Developer, Role::Admin];

/// `memory_session_status` - current status lists for the session
struct SessionStatus {
    definition: ToolDefinition,
}

impl SessionStatus {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "memory_session_status".into(),
                description: "Read the current session status: completed items, discussion points, open questions, and key results".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
                domain: "memory".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for SessionStatus {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = ctx.require_session()?;
        let memory = ctx
            .deps
            .memory
            .read(ctx.project_or_default(), session_id)
            .await?;
        Ok(json!({
            "title": memory.title,
            "currentStatus": memory.current_status,
            "keyResults": memory.key_results,
            "learnings": memory.learnings.len(),
            "updated": memory.time.updated,
        }))
    }
}

/// `memory_add_learning` - record an insight on the session
struct AddLearning {
    definition: ToolDefinition,
}

impl AddLearning {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "memory_add_learning".into(),
                description: "Record a learning (category + insight, optional context) on the current session".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "category": {"type": "string"},
                        "insight": {"type": "string"},
                        "context": {"type": "string"}
                    },
                    "required": ["category", "insight"]
                }),
                domain: "memory".into(),
                permission: Permission::Write,
                allowed_roles: WRITER_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for AddLearning {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = ctx.require_session()?.to_string();
        let category = args["category"].as_str().unwrap_or("general");
        let insight = args["insight"].as_str().unwrap_or_default();

        let mut learning = Learning::new(category, insight);
        if let Some(context) = args.get("context").and_then(|c| c.as_str()) {
            learning = learning.with_context(context);
        }
        let id = learning.id.clone();

        ctx.deps
            .memory
            .add_learning(ctx.project_or_default(), &session_id, learning)
            .await?;
        Ok(json!({"status": "recorded", "id": id}))
    }
}

/// `memory_add_key_result` - record a deliverable on the session
struct AddKeyResult {
    definition: ToolDefinition,
}

impl AddKeyResult {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "memory_add_key_result".into(),
                description: "Record a key result (deliverable) on the current session".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "result": {"type": "string"}
                    },
                    "required": ["result"]
                }),
                domain: "memory".into(),
                permission: Permission::Write,
                allowed_roles: WRITER_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for AddKeyResult {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = ctx.require_session()?.to_string();
        let result = args["result"].as_str().unwrap_or_default();
        ctx.deps
            .memory
            .add_key_result(ctx.project_or_default(), &session_id, result)
            .await?;
        Ok(json!({"status": "recorded"}))
    }
}

/// `memory_work_log` - recent work-log entries
struct ReadWorkLog {
    definition: ToolDefinition,
}

impl ReadWorkLog {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "memory_work_log".into(),
                description: "Read the most recent work-log entries for the current session".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "limit": {"type": "integer", "minimum": 1, "maximum": 500}
                    }
                }),
                domain: "memory".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for ReadWorkLog {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = ctx.require_session()?.to_string();
        let limit = args
            .get("limit")
            .and_then(|l| l.as_u64())
            .map(|l| l as usize)
            .unwrap_or(50);
        let entries = ctx
            .deps
            .memory
            .read_work_log(ctx.project_or_default(), &session_id, Some(limit))
            .await?;
        Ok(serde_json::to_value(entries)?)
    }
}

/// `memory_export` - session memory as markdown
struct ExportMemory {
    definition: ToolDefinition,
}

impl ExportMemory {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "memory_export".into(),
                description: "Export the current session memory as a markdown document".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
                domain: "memory".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for ExportMemory {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = ctx.require_session()?;
        let memory = ctx
            .deps
            .memory
            .read(ctx.project_or_default(), session_id)
            .await?;
        Ok(json!({"markdown": export_as_markdown(&memory)}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::session::SessionManager;
    use crate::tools::{SessionEnablement, ToolDeps, ToolSearchIndex};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn context() -> (TempDir, ExecutionContext) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with_debounce(dir.path(), Duration::from_millis(5));
        store.create("proj", "sess", "Test session").await.unwrap();

        let deps = Arc::new(ToolDeps::new(
            store.clone(),
            SessionManager::new(store),
            Arc::new(ToolSearchIndex::new()),
            Arc::new(SessionEnablement::new(dir.path())),
        ));
        let ctx = ExecutionContext {
            session_id: Some("sess".into()),
            project_id: Some("proj".into()),
            role: Role::Developer,
            deps,
        };
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_session_status_reads_memory() {
        let (_dir, ctx) = context().await;
        let result = SessionStatus::new().execute(json!({}), &ctx).await.unwrap();
        assert_eq!(result["title"], "Test session");
        assert_eq!(result["learnings"], 0);
    }

    #[tokio::test]
    async fn test_add_learning_then_status_counts_it() {
        let (_dir, ctx) = context().await;
        let result = AddLearning::new()
            .execute(
                json!({"category": "pattern", "insight": "batch queries"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "recorded");

        let status = SessionStatus::new().execute(json!({}), &ctx).await.unwrap();
        assert_eq!(status["learnings"], 1);
    }

    #[tokio::test]
    async fn test_add_learning_validates_args() {
        let tool = AddLearning::new();
        let err = tool.validate_args(&json!({"category": "x"})).unwrap_err();
        assert!(err.message.contains("insight"));
    }

    #[tokio::test]
    async fn test_tools_require_session() {
        let (_dir, mut ctx) = context().await;
        ctx.session_id = None;
        let err = SessionStatus::new().execute(json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_export_produces_markdown() {
        let (_dir, ctx) = context().await;
        let result = ExportMemory::new().execute(json!({}), &ctx).await.unwrap();
        assert!(result["markdown"].as_str().unwrap().starts_with("# Test session"));
    }
}
