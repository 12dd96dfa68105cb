// src/orchestrator/mod.rs
// Binds an objective to a plan, runs it, and learns from the outcome

pub mod classify;
pub mod patterns;

pub use classify::{ObjectiveType, classify_objective, estimate_complexity, suggest_agent_sequence};
pub use patterns::{ExecutionPattern, FailurePattern, PatternStore};

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::{BusEvent, EventBus};
use crate::collaborator::{Collaborator, MessagePart};
use crate::error::{ErrorKind, Result};
use crate::memory::worklog::{WorkLogEntry, WorkLogType};
use crate::memory::{Learning, MemoryStore};
use crate::scheduler::{
    ExecuteOptions, Plan, PlanExecutor, PlanResult, Task, build_plan,
};

/// Per-objective execution parameters
#[derive(Debug, Clone)]
pub struct ObjectiveOptions {
    pub project_id: String,
    pub session_id: String,
    pub base_model: Option<String>,
    pub skip_on_error: bool,
}

impl Default for ObjectiveOptions {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            session_id: "default".to_string(),
            base_model: None,
            skip_on_error: true,
        }
    }
}

/// Outcome of `execute_objective`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveResult {
    pub objective: String,
    pub objective_type: ObjectiveType,
    pub complexity: f64,
    pub agent_sequence: Vec<String>,
    pub plan_result: PlanResult,
}

/// The orchestrator: objective → classification → plan → execution →
/// learned pattern, with session memory updated at each milestone.
pub struct Orchestrator {
    executor: PlanExecutor,
    memory: MemoryStore,
    patterns: PatternStore,
    bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        memory: MemoryStore,
        patterns: PatternStore,
        bus: EventBus,
    ) -> Self {
        Self {
            executor: PlanExecutor::new(collaborator, bus.clone()),
            memory,
            patterns,
            bus,
        }
    }

    pub async fn execute_objective(
        &self,
        objective: &str,
        options: &ObjectiveOptions,
    ) -> Result<ObjectiveResult> {
        // 1. Classify and consult what past runs of this type looked like
        let objective_type = classify_objective(objective);
        let complexity = estimate_complexity(objective);
        let agent_sequence: Vec<String> = suggest_agent_sequence(objective_type)
            .into_iter()
            .map(String::from)
            .collect();

        if let Some(pattern) = self.patterns.lookup(objective_type.as_str()).await {
            info!(
                "[Orchestrator] Past '{}' runs: success rate {:.2}, avg {:.0}ms",
                objective_type.as_str(),
                pattern.success_rate,
                pattern.avg_duration_ms
            );
        }
        self.bus.publish(BusEvent::ObjectiveStarted {
            objective_type: objective_type.as_str().to_string(),
        });
        self.log_milestone(
            options,
            WorkLogType::UserRequest,
            &format!("objective ({}): {objective}", objective_type.as_str()),
        )
        .await;

        // 2. Build the DAG and run it
        let plan = build_objective_plan(objective, objective_type, complexity)?;
        self.log_milestone(
            options,
            WorkLogType::AiResponse,
            &format!(
                "planned {} tasks across {} levels",
                plan.task_count(),
                plan.levels.len()
            ),
        )
        .await;

        let execute_options = ExecuteOptions {
            session_id: Some(options.session_id.clone()),
            base_agent: "general".to_string(),
            base_model: options.base_model.clone(),
            skip_on_error: options.skip_on_error,
        };
        let plan_result = self.executor.execute(&plan, &execute_options, None).await?;

        // 3. Learn from the outcome and update memory
        if plan_result.success {
            self.learn_success(objective, objective_type, &agent_sequence, &plan_result, options)
                .await;
        } else {
            self.learn_failure(objective_type, &plan_result, options).await;
        }

        self.bus.publish(BusEvent::ObjectiveCompleted {
            objective_type: objective_type.as_str().to_string(),
            success: plan_result.success,
        });

        Ok(ObjectiveResult {
            objective: objective.to_string(),
            objective_type,
            complexity,
            agent_sequence,
            plan_result,
        })
    }

    async fn learn_success(
        &self,
        objective: &str,
        objective_type: ObjectiveType,
        agent_sequence: &[String],
        plan_result: &PlanResult,
        options: &ObjectiveOptions,
    ) {
        let tool_sequence = collect_tool_sequence(plan_result);
        if let Err(err) = self
            .patterns
            .record_success(
                objective_type.as_str(),
                agent_sequence,
                &tool_sequence,
                plan_result.total_duration_ms,
            )
            .await
        {
            warn!("[Orchestrator] Failed to persist success pattern: {}", err);
        }

        if let Err(err) = self
            .memory
            .add_completed(&options.project_id, &options.session_id, objective)
            .await
        {
            warn!("[Orchestrator] Memory update failed: {}", err);
        }

        let artifacts: BTreeSet<&String> = plan_result
            .results
            .values()
            .flat_map(|r| r.artifacts.iter())
            .collect();
        if !artifacts.is_empty() {
            let summary = format!(
                "{objective} ({} artifacts: {})",
                artifacts.len(),
                artifacts
                    .iter()
                    .take(3)
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if let Err(err) = self
                .memory
                .add_key_result(&options.project_id, &options.session_id, &summary)
                .await
            {
                warn!("[Orchestrator] Memory update failed: {}", err);
            }
        }

        if plan_result.parallelization_gain > 0.2 {
            let learning = Learning::new(
                "pattern",
                format!(
                    "'{}' objectives parallelize well (gain {:.0}%)",
                    objective_type.as_str(),
                    plan_result.parallelization_gain * 100.0
                ),
            );
            if let Err(err) = self
                .memory
                .add_learning(&options.project_id, &options.session_id, learning)
                .await
            {
                warn!("[Orchestrator] Memory update failed: {}", err);
            }
        }
    }

    async fn learn_failure(
        &self,
        objective_type: ObjectiveType,
        plan_result: &PlanResult,
        options: &ObjectiveOptions,
    ) {
        let (error_kind, message) = plan_result
            .results
            .values()
            .find(|r| !r.success && r.error.as_deref() != Some("Dependency failed"))
            .and_then(|r| r.error.clone())
            .map(|message| (classify_failure_message(&message), message))
            .unwrap_or((ErrorKind::Internal, "unknown failure".to_string()));

        if let Err(err) = self
            .patterns
            .record_failure(objective_type.as_str(), error_kind, &message)
            .await
        {
            warn!("[Orchestrator] Failed to persist failure pattern: {}", err);
        }

        self.log_milestone(options, WorkLogType::Error, &message).await;
    }

    async fn log_milestone(&self, options: &ObjectiveOptions, entry_type: WorkLogType, summary: &str) {
        if let Err(err) = self
            .memory
            .append_work_log(
                &options.project_id,
                &options.session_id,
                WorkLogEntry::new(entry_type, summary),
            )
            .await
        {
            // Work-log failures never mask the primary operation's outcome
            warn!("[Orchestrator] Work-log append failed: {}", err);
        }
        self.bus.publish(BusEvent::MemoryUpdated {
            session_id: options.session_id.clone(),
        });
    }
}

/// Tool names in completion order across all task results
fn collect_tool_sequence(plan_result: &PlanResult) -> Vec<String> {
    let mut sequence = Vec::new();
    for result in plan_result.results.values() {
        for part in &result.parts {
            if let MessagePart::Tool { name, .. } = part {
                if !sequence.contains(name) {
                    sequence.push(name.clone());
                }
            }
        }
    }
    sequence.sort();
    sequence
}

/// Crude kind classification from a recorded failure message
fn classify_failure_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") || lowered.contains("timed out") {
        ErrorKind::Timeout
    } else if lowered.contains("connection") || lowered.contains("network") || lowered.contains("unavailable") {
        ErrorKind::Network
    } else if lowered.contains("rate limit") {
        ErrorKind::RateLimited
    } else if lowered.contains("forbidden") || lowered.contains("permission") {
        ErrorKind::Forbidden
    } else if lowered.contains("unauthorized") || lowered.contains("credential") {
        ErrorKind::Unauthorized
    } else {
        ErrorKind::Remote
    }
}

/// The canonical objective DAG: research* (parallel, scaled by complexity)
/// → design* (parallel) → implement → test → document.
pub fn build_objective_plan(
    objective: &str,
    objective_type: ObjectiveType,
    complexity: f64,
) -> Result<Plan> {
    let agents = suggest_agent_sequence(objective_type);
    let research_agent = agents[0];
    let design_agent = agents.get(1).copied().unwrap_or("designer");
    let build_agent = agents.get(2).copied().unwrap_or("builder");

    let research_count = if complexity > 0.6 {
        3
    } else if complexity > 0.3 {
        2
    } else {
        1
    };
    let design_count = if complexity > 0.5 { 2 } else { 1 };

    let research_focus = ["existing records and tables", "related apis", "past patterns"];
    let design_focus = ["structure and interface", "data handling"];

    let mut tasks = Vec::new();
    let mut research_ids = Vec::new();
    for i in 0..research_count {
        let id = format!("research-{}", i + 1);
        tasks.push(
            Task::new(
                &id,
                format!("Research {} for: {objective}", research_focus[i]),
            )
            .with_agent(research_agent)
            .with_description(format!("Research phase {} of {research_count}", i + 1)),
        );
        research_ids.push(id);
    }

    let research_refs: Vec<&str> = research_ids.iter().map(|s| s.as_str()).collect();
    let mut design_ids = Vec::new();
    for i in 0..design_count {
        let id = format!("design-{}", i + 1);
        tasks.push(
            Task::new(&id, format!("Design {} for: {objective}", design_focus[i]))
                .with_agent(design_agent)
                .depends_on(&research_refs),
        );
        design_ids.push(id);
    }

    let design_refs: Vec<&str> = design_ids.iter().map(|s| s.as_str()).collect();
    tasks.push(
        Task::new("implement", format!("Implement: {objective}"))
            .with_agent(build_agent)
            .depends_on(&design_refs),
    );
    tasks.push(
        Task::new("test", format!("Test the implementation of: {objective}"))
            .with_agent("tester")
            .depends_on(&["implement"]),
    );
    tasks.push(
        Task::new("document", format!("Document: {objective}"))
            .with_agent("documenter")
            .depends_on(&["test"]),
    );

    build_plan(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{PromptRequest, PromptResponse};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl Collaborator for Echo {
        async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse> {
            Ok(PromptResponse {
                parts: vec![MessagePart::text(format!("handled by {}", request.agent))],
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Collaborator for AlwaysFails {
        async fn prompt(&self, _request: PromptRequest) -> Result<PromptResponse> {
            Err(crate::error::DriftError::timeout("collaborator timed out"))
        }
    }

    fn orchestrator(dir: &TempDir, collaborator: Arc<dyn Collaborator>) -> Orchestrator {
        let memory = MemoryStore::with_debounce(dir.path(), Duration::from_millis(5));
        Orchestrator::new(
            collaborator,
            memory,
            PatternStore::new(dir.path()),
            EventBus::new(),
        )
    }

    #[test]
    fn test_objective_plan_shape_scales_with_complexity() {
        let simple = build_objective_plan("fix label", ObjectiveType::Generic, 0.1).unwrap();
        assert_eq!(simple.levels.len(), 5);
        assert_eq!(simple.root_task_ids.len(), 1);

        let complex = build_objective_plan(
            "big build",
            ObjectiveType::Widget,
            0.9,
        )
        .unwrap();
        let sizes: Vec<usize> = complex.levels.iter().map(|l| l.len()).collect();
        assert_eq!(sizes, vec![3, 2, 1, 1, 1]);
        assert_eq!(complex.root_task_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_objective_success_path() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, Arc::new(Echo));
        orchestrator
            .memory
            .create("proj", "sess", "Objective run")
            .await
            .unwrap();

        let options = ObjectiveOptions {
            project_id: "proj".into(),
            session_id: "sess".into(),
            ..Default::default()
        };
        let result = orchestrator
            .execute_objective("Create an incident dashboard widget", &options)
            .await
            .unwrap();

        assert_eq!(result.objective_type, ObjectiveType::Widget);
        assert!(result.plan_result.success);

        // Pattern learned
        let pattern = orchestrator.patterns.lookup("widget").await.unwrap();
        assert_eq!(pattern.runs, 1);

        // Memory milestone recorded
        let memory = orchestrator.memory.read("proj", "sess").await.unwrap();
        assert!(
            memory
                .current_status
                .completed
                .iter()
                .any(|c| c.contains("incident dashboard"))
        );
    }

    #[tokio::test]
    async fn test_execute_objective_failure_records_pattern() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&dir, Arc::new(AlwaysFails));
        orchestrator
            .memory
            .create("proj", "sess", "Objective run")
            .await
            .unwrap();

        let options = ObjectiveOptions {
            project_id: "proj".into(),
            session_id: "sess".into(),
            ..Default::default()
        };
        let result = orchestrator
            .execute_objective("Create a widget", &options)
            .await
            .unwrap();

        assert!(!result.plan_result.success);
        let failures = orchestrator.patterns.recent_failures("widget", 5).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_failure_message() {
        assert_eq!(classify_failure_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_failure_message("connection refused"), ErrorKind::Network);
        assert_eq!(classify_failure_message("rate limit hit"), ErrorKind::RateLimited);
        assert_eq!(classify_failure_message("boom"), ErrorKind::Remote);
    }
}
