// src/tools/builtin/session.rs
// Tools over the session fork tree

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::session::render::{RenderOptions, render_tree};
use crate::tools::{ExecutionContext, Permission, Role, Tool, ToolDefinition};

pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListSessions::new()),
        Arc::new(SessionAncestry::new()),
        Arc::new(ForkSession::new()),
        Arc::new(SessionTree::new()),
    ]
}

const ALL_ROLES: [Role; 3] = [Role::Stakeholder, Role::Developer, Role::Admin];
const WRITER_ROLES: [Role; 2] = [Role::Developer, Role::Admin];

/// `session_list` - all sessions of the project
struct ListSessions {
    definition: ToolDefinition,
}

impl ListSessions {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "session_list".into(),
                description: "List all sessions of the current project with titles and timestamps".into(),
                input_schema: json!({"type": "object", "properties": {}}),
                domain: "session".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for ListSessions {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let sessions = ctx
            .deps
            .sessions
            .list_project_sessions(ctx.project_or_default())
            .await?;
        let list: Vec<Value> = sessions
            .iter()
            .map(|s| {
                json!({
                    "id": s.session_id,
                    "title": s.title,
                    "parentId": s.parent_id,
                    "updated": s.time.updated,
                })
            })
            .collect();
        Ok(json!(list))
    }
}

/// `session_ancestry` - root-to-leaf chain for a session
struct SessionAncestry {
    definition: ToolDefinition,
}

impl SessionAncestry {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "session_ancestry".into(),
                description: "Return the fork ancestry (root to leaf) for a session, defaulting to the current one".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "session_id": {"type": "string"}
                    }
                }),
                domain: "session".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for SessionAncestry {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let session_id = match args.get("session_id").and_then(|s| s.as_str()) {
            Some(id) => id.to_string(),
            None => ctx.require_session()?.to_string(),
        };
        let ancestry = ctx
            .deps
            .sessions
            .get_ancestry(ctx.project_or_default(), &session_id)
            .await?;
        Ok(json!({"ancestry": ancestry}))
    }
}

/// `session_fork` - branch a new session off an existing one
struct ForkSession {
    definition: ToolDefinition,
}

impl ForkSession {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "session_fork".into(),
                description: "Fork a new session from a parent session in the same project".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "parent_id": {"type": "string"},
                        "title": {"type": "string"}
                    },
                    "required": ["parent_id", "title"]
                }),
                domain: "session".into(),
                permission: Permission::Write,
                allowed_roles: WRITER_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for ForkSession {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let parent_id = args["parent_id"].as_str().unwrap_or_default();
        let title = args["title"].as_str().unwrap_or_default();
        let session_id = Uuid::new_v4().to_string();

        let memory = ctx
            .deps
            .sessions
            .fork_session(ctx.project_or_default(), parent_id, &session_id, title)
            .await?;
        Ok(json!({
            "status": "forked",
            "sessionId": memory.session_id,
            "parentId": memory.parent_id,
        }))
    }
}

/// `session_tree` - rendered fork tree for the project
struct SessionTree {
    definition: ToolDefinition,
}

impl SessionTree {
    fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: "session_tree".into(),
                description: "Render the project's session fork tree with the current session marked".into(),
                input_schema: json!({"type": "object", "properties": {}}),
                domain: "session".into(),
                permission: Permission::Read,
                allowed_roles: ALL_ROLES.to_vec(),
            },
        }
    }
}

#[async_trait]
impl Tool for SessionTree {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, _args: Value, ctx: &ExecutionContext) -> Result<Value> {
        let tree = ctx
            .deps
            .sessions
            .build_session_tree(ctx.project_or_default(), ctx.session_id.as_deref())
            .await?;
        Ok(json!({"tree": render_tree(&tree, RenderOptions::default())}))
    }
}
