// src/scheduler/render.rs
// Textual plan summary for logs and the CLI

use super::{Plan, PlanResult};

/// Render a plan as a level-by-level summary:
/// ```text
/// Plan 3f2a… — 4 tasks, 3 levels, 1 root
/// Level 1: a [general]
/// Level 2: b [designer] ∥ c [designer]
/// Level 3: d [builder] (deps: b, c)
/// ```
pub fn visualize_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let short_id: String = plan.id.chars().take(8).collect();
    out.push_str(&format!(
        "Plan {} — {} tasks, {} levels, {} roots\n",
        short_id,
        plan.task_count(),
        plan.levels.len(),
        plan.root_task_ids.len()
    ));

    for (index, level) in plan.levels.iter().enumerate() {
        let rendered: Vec<String> = level
            .iter()
            .map(|id| {
                let task = &plan.tasks[id];
                let agent = task.agent_name.as_deref().unwrap_or("base");
                if task.dependencies.is_empty() {
                    format!("{id} [{agent}]")
                } else {
                    format!("{id} [{agent}] (deps: {})", task.dependencies.join(", "))
                }
            })
            .collect();
        out.push_str(&format!("Level {}: {}\n", index + 1, rendered.join(" ∥ ")));
    }
    out
}

/// One-line outcome summary for a finished plan
pub fn summarize_result(result: &PlanResult) -> String {
    format!(
        "{}: {} completed, {} failed, {} skipped in {}ms (parallelization gain {:.0}%)",
        if result.success { "ok" } else { "failed" },
        result.tasks_completed,
        result.tasks_failed,
        result.tasks_skipped,
        result.total_duration_ms,
        result.parallelization_gain * 100.0
    )
}
