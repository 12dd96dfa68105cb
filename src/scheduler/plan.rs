// src/scheduler/plan.rs
// Plan construction: dependency validation, cycle detection, level
// assignment by Kahn's algorithm

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{Plan, Task};
use crate::error::{DriftError, Result};

/// Build a stratified plan from a task list.
///
/// Fails with `Validation` on duplicate ids, dangling dependencies, or
/// cycles. Level sets are deterministic up to intra-level ordering (ids are
/// sorted within each level).
pub fn build_plan(tasks: Vec<Task>) -> Result<Plan> {
    let mut task_map: HashMap<String, Task> = HashMap::new();
    for task in tasks {
        if task_map.contains_key(&task.id) {
            return Err(DriftError::validation(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
        task_map.insert(task.id.clone(), task);
    }

    // Every dependency must reference an existing task
    for task in task_map.values() {
        for dep in &task.dependencies {
            if !task_map.contains_key(dep) {
                return Err(DriftError::validation(format!(
                    "Task '{}' depends on non-existent task '{}'",
                    task.id, dep
                )));
            }
        }
    }

    detect_cycles(&task_map)?;

    let levels = assign_levels(&task_map)?;

    let mut root_task_ids: Vec<String> = task_map
        .values()
        .filter(|task| task.dependencies.is_empty())
        .map(|task| task.id.clone())
        .collect();
    root_task_ids.sort();

    Ok(Plan {
        id: Uuid::new_v4().to_string(),
        tasks: task_map,
        levels,
        root_task_ids,
    })
}

/// Depth-first search with a recursion set; any back edge is a cycle
fn detect_cycles(tasks: &HashMap<String, Task>) -> Result<()> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        id: &'a str,
        tasks: &'a HashMap<String, Task>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if in_stack.contains(id) {
            return Err(DriftError::validation("Cyclic dependency detected"));
        }
        if visited.contains(id) {
            return Ok(());
        }
        visited.insert(id);
        in_stack.insert(id);
        if let Some(task) = tasks.get(id) {
            for dep in &task.dependencies {
                visit(dep, tasks, visited, in_stack)?;
            }
        }
        in_stack.remove(id);
        Ok(())
    }

    let mut ids: Vec<&str> = tasks.keys().map(|id| id.as_str()).collect();
    ids.sort();
    for id in ids {
        visit(id, tasks, &mut visited, &mut in_stack)?;
    }
    Ok(())
}

/// Kahn's algorithm: each level is the set of all unscheduled tasks whose
/// remaining in-degree is zero.
fn assign_levels(tasks: &HashMap<String, Task>) -> Result<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks.values() {
        in_degree.entry(task.id.as_str()).or_insert(0);
        for dep in &task.dependencies {
            *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }

    let mut remaining: HashSet<&str> = tasks.keys().map(|id| id.as_str()).collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|id| in_degree.get(*id).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        // Safety check: cycle detection already ran, but an empty ready set
        // with tasks remaining must never slip through silently.
        if ready.is_empty() {
            return Err(DriftError::validation(
                "no schedulable tasks remain; dependency graph is not a DAG",
            ));
        }
        ready.sort();

        for id in &ready {
            remaining.remove(id);
            if let Some(deps) = dependents.get(id) {
                for dependent in deps {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
        }

        levels.push(ready.iter().map(|id| id.to_string()).collect());
    }

    Ok(levels)
}

/// Non-throwing structural report used after plan mutation or load
#[derive(Debug, Clone, Serialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Report missing dependencies and level-order violations without failing
pub fn validate_plan(plan: &Plan) -> PlanValidation {
    let mut issues = Vec::new();

    for task in plan.tasks.values() {
        for dep in &task.dependencies {
            if !plan.tasks.contains_key(dep) {
                issues.push(format!(
                    "task '{}' depends on missing task '{}'",
                    task.id, dep
                ));
                continue;
            }
            match (plan.level_of(dep), plan.level_of(&task.id)) {
                (Some(dep_level), Some(task_level)) if dep_level >= task_level => {
                    issues.push(format!(
                        "dependency '{}' (level {}) does not precede task '{}' (level {})",
                        dep, dep_level, task.id, task_level
                    ));
                }
                (None, _) => issues.push(format!("dependency '{dep}' is not scheduled in any level")),
                (_, None) => issues.push(format!("task '{}' is not scheduled in any level", task.id)),
                _ => {}
            }
        }
    }

    let scheduled: usize = plan.levels.iter().map(|level| level.len()).sum();
    if scheduled != plan.tasks.len() {
        issues.push(format!(
            "levels schedule {} tasks but the plan has {}",
            scheduled,
            plan.tasks.len()
        ));
    }

    PlanValidation {
        valid: issues.is_empty(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_pipeline_levels() {
        let plan = build_plan(vec![
            Task::new("a", "first"),
            Task::new("b", "second").depends_on(&["a"]),
            Task::new("c", "third").depends_on(&["b"]),
        ])
        .unwrap();

        assert_eq!(plan.levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(plan.root_task_ids, vec!["a"]);
    }

    #[test]
    fn test_diamond_levels() {
        let plan = build_plan(vec![
            Task::new("a", "root"),
            Task::new("b", "left").depends_on(&["a"]),
            Task::new("c", "right").depends_on(&["a"]),
            Task::new("d", "join").depends_on(&["b", "c"]),
        ])
        .unwrap();

        assert_eq!(plan.levels.len(), 3);
        assert_eq!(plan.levels[0], vec!["a"]);
        assert_eq!(plan.levels[1], vec!["b", "c"]);
        assert_eq!(plan.levels[2], vec!["d"]);
    }

    #[test]
    fn test_widget_creation_shape() {
        // Three parallel research, two parallel design, implement, test, document
        let plan = build_plan(vec![
            Task::new("research-tables", "p"),
            Task::new("research-apis", "p"),
            Task::new("research-patterns", "p"),
            Task::new("design-ui", "p").depends_on(&[
                "research-tables",
                "research-apis",
                "research-patterns",
            ]),
            Task::new("design-data", "p").depends_on(&[
                "research-tables",
                "research-apis",
                "research-patterns",
            ]),
            Task::new("implement", "p").depends_on(&["design-ui", "design-data"]),
            Task::new("test", "p").depends_on(&["implement"]),
            Task::new("document", "p").depends_on(&["test"]),
        ])
        .unwrap();

        let sizes: Vec<usize> = plan.levels.iter().map(|l| l.len()).collect();
        assert_eq!(sizes, vec![3, 2, 1, 1, 1]);
        assert_eq!(plan.root_task_ids.len(), 3);
    }

    #[test]
    fn test_every_task_scheduled_once() {
        let plan = build_plan(vec![
            Task::new("a", "p"),
            Task::new("b", "p").depends_on(&["a"]),
            Task::new("c", "p").depends_on(&["a"]),
            Task::new("d", "p"),
        ])
        .unwrap();

        let mut seen = HashSet::new();
        for level in &plan.levels {
            for id in level {
                assert!(seen.insert(id.clone()), "task '{id}' scheduled twice");
            }
        }
        assert_eq!(seen.len(), plan.task_count());

        // Every edge points to an earlier level
        for task in plan.tasks.values() {
            for dep in &task.dependencies {
                assert!(plan.level_of(dep).unwrap() < plan.level_of(&task.id).unwrap());
            }
        }
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = build_plan(vec![
            Task::new("x", "p").depends_on(&["y"]),
            Task::new("y", "p").depends_on(&["x"]),
        ])
        .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert!(err.message.contains("Cyclic dependency detected"));
    }

    #[test]
    fn test_self_cycle_is_rejected() {
        let err = build_plan(vec![Task::new("x", "p").depends_on(&["x"])]).unwrap_err();
        assert!(err.message.contains("Cyclic dependency detected"));
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let err = build_plan(vec![Task::new("a", "p").depends_on(&["ghost"])]).unwrap_err();
        assert!(err.message.contains("depends on non-existent task"));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let err = build_plan(vec![Task::new("a", "p"), Task::new("a", "q")]).unwrap_err();
        assert!(err.message.contains("duplicate task id"));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let tasks = || {
            vec![
                Task::new("a", "p"),
                Task::new("b", "p").depends_on(&["a"]),
                Task::new("c", "p").depends_on(&["a"]),
                Task::new("d", "p").depends_on(&["b", "c"]),
            ]
        };
        let first = build_plan(tasks()).unwrap();
        let second = build_plan(tasks()).unwrap();
        assert_eq!(first.levels, second.levels);
    }

    #[test]
    fn test_validate_built_plan_is_valid() {
        let plan = build_plan(vec![
            Task::new("a", "p"),
            Task::new("b", "p").depends_on(&["a"]),
        ])
        .unwrap();

        let validation = validate_plan(&plan);
        assert!(validation.valid, "unexpected issues: {:?}", validation.issues);
    }

    #[test]
    fn test_validate_reports_corrupted_levels() {
        let mut plan = build_plan(vec![
            Task::new("a", "p"),
            Task::new("b", "p").depends_on(&["a"]),
        ])
        .unwrap();

        // Reverse the levels by hand; validation reports without throwing
        plan.levels.reverse();
        let validation = validate_plan(&plan);
        assert!(!validation.valid);
        assert!(
            validation
                .issues
                .iter()
                .any(|issue| issue.contains("does not precede"))
        );
    }
}
