// src/scheduler/mod.rs
// Task graph types shared by plan building and execution

pub mod executor;
pub mod plan;
pub mod render;

pub use executor::{ExecuteOptions, PlanExecutor, ProgressEvent};
pub use plan::{PlanValidation, build_plan, validate_plan};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::collaborator::MessagePart;

/// One unit of work assigned to a specialized agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Agent handling the task; empty falls back to the execution base agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_name: None,
            prompt: prompt.into(),
            description: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent_name = Some(agent.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|id| id.to_string()).collect();
        self
    }
}

/// Topologically stratified execution plan. Every task appears in exactly
/// one level; every dependency lives in an earlier level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub tasks: HashMap<String, Task>,
    pub levels: Vec<Vec<String>>,
    pub root_task_ids: Vec<String>,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn level_of(&self, task_id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|id| id == task_id))
    }
}

/// Result of one task's execution (or its skip)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub output: String,
    /// Distinct external identifiers extracted from completed tool outputs
    pub artifacts: BTreeSet<String>,
    pub parts: Vec<MessagePart>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a plan run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub plan_id: String,
    pub success: bool,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    pub results: HashMap<String, TaskResult>,
    pub total_duration_ms: u64,
    /// `(Σ task durations − wall time) / Σ task durations`, clamped to [0, 1]
    pub parallelization_gain: f64,
}

impl PlanResult {
    pub fn compute_gain(total_duration_ms: u64, results: &HashMap<String, TaskResult>) -> f64 {
        let sum: u64 = results.values().map(|r| r.duration_ms).sum();
        if sum == 0 {
            return 0.0;
        }
        let gain = (sum as f64 - total_duration_ms as f64) / sum as f64;
        gain.clamp(0.0, 1.0)
    }
}
