// src/scheduler/executor.rs
// Level-wise parallel plan execution with skip-on-failure propagation

use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{Plan, PlanResult, Task, TaskResult};
use crate::bus::{BusEvent, EventBus};
use crate::collaborator::{Collaborator, MessagePart, PromptRequest};
use crate::error::Result;

lazy_static! {
    // Artifact heuristic: any 32-hex-digit token in completed tool outputs
    static ref ARTIFACT_ID: Regex = Regex::new(r"\b[0-9a-f]{32}\b").unwrap();
}

/// Execution-wide settings
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub session_id: Option<String>,
    pub base_agent: String,
    pub base_model: Option<String>,
    /// Skip tasks whose dependencies failed instead of running them
    pub skip_on_error: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            base_agent: "general".to_string(),
            base_model: None,
            skip_on_error: true,
        }
    }
}

/// Progress callbacks surfaced to the caller during execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ProgressEvent {
    TaskStart { task_id: String, agent: String },
    TaskComplete { task_id: String, duration_ms: u64 },
    TaskFailed { task_id: String, error: String },
    TaskSkipped { task_id: String },
    LevelComplete { level: usize, of: usize },
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Executes plans against a collaborator, one level at a time. Tasks within
/// a level run concurrently; the level join is the only barrier.
pub struct PlanExecutor {
    collaborator: Arc<dyn Collaborator>,
    bus: EventBus,
}

impl PlanExecutor {
    pub fn new(collaborator: Arc<dyn Collaborator>, bus: EventBus) -> Self {
        Self { collaborator, bus }
    }

    pub async fn execute(
        &self,
        plan: &Plan,
        options: &ExecuteOptions,
        on_progress: Option<ProgressFn>,
    ) -> Result<PlanResult> {
        let started = Instant::now();
        let mut results: HashMap<String, TaskResult> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();

        self.bus.publish(BusEvent::PlanStarted {
            plan_id: plan.id.clone(),
            task_count: plan.task_count(),
        });

        let level_count = plan.levels.len();
        for (level_index, level) in plan.levels.iter().enumerate() {
            let mut runnable: Vec<&Task> = Vec::new();

            for task_id in level {
                let task = &plan.tasks[task_id];
                let blocked = options.skip_on_error
                    && task
                        .dependencies
                        .iter()
                        .any(|dep| failed.contains(dep) || skipped.contains(dep));

                if blocked {
                    debug!("[Scheduler] Skipping '{}' (failed dependency)", task_id);
                    skipped.insert(task_id.clone());
                    results.insert(task_id.clone(), skipped_result(task_id));
                    if let Some(progress) = &on_progress {
                        progress(ProgressEvent::TaskSkipped {
                            task_id: task_id.clone(),
                        });
                    }
                    self.bus.publish(BusEvent::TaskSkipped {
                        plan_id: plan.id.clone(),
                        task_id: task_id.clone(),
                    });
                } else {
                    runnable.push(task);
                }
            }

            // Fan the remaining tasks of the level out concurrently and
            // join before advancing.
            let futures: Vec<_> = runnable
                .iter()
                .map(|&task| self.run_task(plan, task, options, on_progress.clone()))
                .collect();
            for result in join_all(futures).await {
                if !result.success {
                    failed.insert(result.task_id.clone());
                }
                results.insert(result.task_id.clone(), result);
            }

            if let Some(progress) = &on_progress {
                progress(ProgressEvent::LevelComplete {
                    level: level_index + 1,
                    of: level_count,
                });
            }
        }

        let total_duration_ms = started.elapsed().as_millis() as u64;
        let tasks_failed = failed.len();
        let tasks_skipped = skipped.len();
        let tasks_completed = results.len() - tasks_failed - tasks_skipped;
        let parallelization_gain = PlanResult::compute_gain(total_duration_ms, &results);
        let success = tasks_failed == 0;

        self.bus.publish(BusEvent::PlanCompleted {
            plan_id: plan.id.clone(),
            success,
        });
        info!(
            "[Scheduler] Plan {} finished: {} completed, {} failed, {} skipped in {}ms (gain {:.2})",
            plan.id, tasks_completed, tasks_failed, tasks_skipped, total_duration_ms, parallelization_gain
        );

        Ok(PlanResult {
            plan_id: plan.id.clone(),
            success,
            tasks_completed,
            tasks_failed,
            tasks_skipped,
            results,
            total_duration_ms,
            parallelization_gain,
        })
    }

    async fn run_task(
        &self,
        plan: &Plan,
        task: &Task,
        options: &ExecuteOptions,
        on_progress: Option<ProgressFn>,
    ) -> TaskResult {
        let agent = task
            .agent_name
            .clone()
            .unwrap_or_else(|| options.base_agent.clone());

        if let Some(progress) = &on_progress {
            progress(ProgressEvent::TaskStart {
                task_id: task.id.clone(),
                agent: agent.clone(),
            });
        }
        self.bus.publish(BusEvent::TaskStarted {
            plan_id: plan.id.clone(),
            task_id: task.id.clone(),
        });

        let started = Instant::now();
        let request = PromptRequest {
            session_id: options.session_id.clone(),
            agent,
            model: options.base_model.clone(),
            parts: vec![MessagePart::text(task.prompt.clone())],
        };

        match self.collaborator.prompt(request).await {
            Ok(response) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let artifacts = extract_artifacts(&response.completed_tool_outputs());
                let result = TaskResult {
                    task_id: task.id.clone(),
                    success: true,
                    output: response.text_output(),
                    artifacts,
                    parts: response.parts,
                    duration_ms,
                    error: None,
                };

                if let Some(progress) = &on_progress {
                    progress(ProgressEvent::TaskComplete {
                        task_id: task.id.clone(),
                        duration_ms,
                    });
                }
                self.bus.publish(BusEvent::TaskCompleted {
                    plan_id: plan.id.clone(),
                    task_id: task.id.clone(),
                    duration_ms,
                });
                result
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                warn!("[Scheduler] Task '{}' failed: {}", task.id, err);

                if let Some(progress) = &on_progress {
                    progress(ProgressEvent::TaskFailed {
                        task_id: task.id.clone(),
                        error: err.to_string(),
                    });
                }
                self.bus.publish(BusEvent::TaskFailed {
                    plan_id: plan.id.clone(),
                    task_id: task.id.clone(),
                    error: err.to_string(),
                });

                TaskResult {
                    task_id: task.id.clone(),
                    success: false,
                    output: String::new(),
                    artifacts: BTreeSet::new(),
                    parts: Vec::new(),
                    duration_ms,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn skipped_result(task_id: &str) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        success: false,
        output: "Skipped due to failed dependency".to_string(),
        artifacts: BTreeSet::new(),
        parts: Vec::new(),
        duration_ms: 0,
        error: Some("Dependency failed".to_string()),
    }
}

/// Deduplicated 32-hex tokens across the given tool outputs
fn extract_artifacts(outputs: &[&str]) -> BTreeSet<String> {
    let mut artifacts = BTreeSet::new();
    for output in outputs {
        for capture in ARTIFACT_ID.find_iter(output) {
            artifacts.insert(capture.as_str().to_string());
        }
    }
    artifacts
}
