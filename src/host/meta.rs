// src/host/meta.rs
// The two fixed meta tools that keep the exposed surface small

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ToolDescriptor;

pub const TOOL_SEARCH: &str = "tool_search";
pub const TOOL_EXECUTE: &str = "tool_execute";

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Whether `tool_search` also enables its top hits for the session.
/// The default is explicit: no auto-enable; the orchestrator may opt in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSearchPolicy {
    None,
    AutoEnableTop(usize),
}

impl Default for ToolSearchPolicy {
    fn default() -> Self {
        ToolSearchPolicy::None
    }
}

pub fn is_meta_tool(name: &str) -> bool {
    name == TOOL_SEARCH || name == TOOL_EXECUTE
}

/// Descriptors for the always-exposed meta tools
pub fn meta_tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: TOOL_SEARCH.to_string(),
            description: "Search the tool catalog by keyword. Returns matching tools with their \
                          availability status for this session; deferred tools must be enabled \
                          before use."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Keywords to search for"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50}
                },
                "required": ["query"]
            }),
        },
        ToolDescriptor {
            name: TOOL_EXECUTE.to_string(),
            description: "Enable a tool for this session (if necessary) and execute it in one \
                          step. Lets an agent holding only the meta tools reach the full catalog."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tool": {"type": "string", "description": "Tool id to execute"},
                    "arguments": {"type": "object", "description": "Arguments for the tool"}
                },
                "required": ["tool"]
            }),
        },
    ]
}
