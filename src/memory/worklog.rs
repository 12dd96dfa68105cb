// src/memory/worklog.rs
// Append-only per-session record of every observable event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of work-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkLogType {
    UserRequest,
    AiResponse,
    ToolCall,
    ToolResult,
    FileCreated,
    FileModified,
    FileDeleted,
    Error,
    Compaction,
    Learning,
}

/// One line of the append-only work log. Entries for a session are totally
/// ordered by file position and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: WorkLogType,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WorkLogEntry {
    pub fn new(entry_type: WorkLogType, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_type,
            summary: summary.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_serializes_with_type_field() {
        let entry = WorkLogEntry::new(WorkLogType::ToolCall, "snow_query_incidents");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["summary"], "snow_query_incidents");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_entry_round_trip_with_metadata() {
        let entry = WorkLogEntry::new(WorkLogType::ToolResult, "42 incidents")
            .with_metadata(json!({"count": 42}));

        let line = serde_json::to_string(&entry).unwrap();
        let back: WorkLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back.entry_type, WorkLogType::ToolResult);
        assert_eq!(back.metadata.unwrap()["count"], 42);
    }
}
