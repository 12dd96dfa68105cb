// src/memory/mod.rs
// Persistent per-session memory: structured state, work log, learnings

pub mod export;
pub mod store;
pub mod worklog;

pub use store::MemoryStore;
pub use worklog::{WorkLogEntry, WorkLogType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling status lists kept per session. Oldest entries are dropped past
/// the caps and the truncation is recorded as a `Compaction` work-log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub discussion_points: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
}

pub const MAX_COMPLETED: usize = 50;
pub const MAX_DISCUSSION_POINTS: usize = 30;
pub const MAX_OPEN_QUESTIONS: usize = 30;

/// Creation/update timestamps; `updated` is monotonic per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeStamps {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl TimeStamps {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created: now,
            updated: now,
        }
    }

    /// Bump `updated`, never moving it backwards
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated {
            self.updated = now;
        }
    }
}

/// An insight worth keeping beyond the conversation that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: String,
    pub category: String,
    pub insight: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Learning {
    pub fn new(category: impl Into<String>, insight: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: category.into(),
            insight: insight.into(),
            context: None,
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Full structured memory for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMemory {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub title_generated: bool,
    /// Fork parent within the same project, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub current_status: CurrentStatus,
    #[serde(default)]
    pub learnings: Vec<Learning>,
    #[serde(default)]
    pub key_results: Vec<String>,
    pub time: TimeStamps,
}

impl SessionMemory {
    pub fn new(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            title: title.into(),
            title_generated: false,
            parent_id: None,
            shared: false,
            current_status: CurrentStatus::default(),
            learnings: Vec::new(),
            key_results: Vec::new(),
            time: TimeStamps::now(),
        }
    }
}

/// Project-level (or global) learnings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningsFile {
    #[serde(default)]
    pub learnings: Vec<Learning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_touch_is_monotonic() {
        let mut time = TimeStamps::now();
        let before = time.updated;
        time.touch();
        assert!(time.updated >= before);
    }

    #[test]
    fn test_session_memory_serde_layout() {
        let memory = SessionMemory::new("proj-1", "sess-1", "Widget work");
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json["sessionID"], "sess-1");
        assert_eq!(json["projectID"], "proj-1");
        assert!(json["currentStatus"]["completed"].as_array().unwrap().is_empty());
        // Absent parent is omitted entirely
        assert!(json.get("parentId").is_none());
    }

    #[test]
    fn test_session_memory_round_trip() {
        let mut memory = SessionMemory::new("proj-1", "sess-1", "Widget work");
        memory.learnings.push(Learning::new("pattern", "parallel research works"));
        memory.key_results.push("incident widget shipped".into());

        let json = serde_json::to_string(&memory).unwrap();
        let back: SessionMemory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, memory.session_id);
        assert_eq!(back.learnings.len(), 1);
        assert_eq!(back.key_results, memory.key_results);
    }
}
