// src/session/tree.rs
// Fork-tree construction for a project's sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::memory::{SessionMemory, TimeStamps};

/// Derived per-session stats used to enrich tree nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub message_count: u64,
    pub cost: f64,
}

/// One node of the session fork tree. Children are owned; the parent is
/// referenced by id only, keeping ownership acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTreeNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub children: Vec<SessionTreeNode>,
    pub depth: usize,
    /// Last child of its parent (drives the ASCII connector choice)
    pub is_last: bool,
    pub message_count: u64,
    pub cost: f64,
    pub time: TreeTime,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeTime {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl From<&TimeStamps> for TreeTime {
    fn from(time: &TimeStamps) -> Self {
        Self {
            created: time.created,
            updated: time.updated,
        }
    }
}

/// Build the forest for a project. Roots are sorted by `time.updated`
/// descending (most recently active first); children by `time.created`
/// ascending. A node whose parent is unknown is treated as a root.
pub fn build_session_tree(
    sessions: &[SessionMemory],
    stats: &[SessionStats],
    current_session: Option<&str>,
) -> Vec<SessionTreeNode> {
    let known: HashMap<&str, usize> = sessions
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.session_id.as_str(), idx))
        .collect();

    let mut children_of: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (idx, session) in sessions.iter().enumerate() {
        match session.parent_id.as_deref().filter(|p| known.contains_key(p)) {
            Some(parent) => children_of.entry(parent).or_default().push(idx),
            None => roots.push(idx),
        }
    }

    for child_indices in children_of.values_mut() {
        child_indices.sort_by_key(|&idx| sessions[idx].time.created);
    }
    roots.sort_by(|&a, &b| sessions[b].time.updated.cmp(&sessions[a].time.updated));

    let root_count = roots.len();
    roots
        .iter()
        .enumerate()
        .map(|(position, &idx)| {
            build_node(
                idx,
                sessions,
                stats,
                &children_of,
                current_session,
                0,
                position + 1 == root_count,
            )
        })
        .collect()
}

fn build_node(
    idx: usize,
    sessions: &[SessionMemory],
    stats: &[SessionStats],
    children_of: &HashMap<&str, Vec<usize>>,
    current_session: Option<&str>,
    depth: usize,
    is_last: bool,
) -> SessionTreeNode {
    let session = &sessions[idx];
    let node_stats = stats.get(idx).copied().unwrap_or_default();
    let child_indices = children_of
        .get(session.session_id.as_str())
        .cloned()
        .unwrap_or_default();
    let child_count = child_indices.len();

    SessionTreeNode {
        id: session.session_id.clone(),
        title: session.title.clone(),
        parent_id: session.parent_id.clone(),
        children: child_indices
            .iter()
            .enumerate()
            .map(|(position, &child_idx)| {
                build_node(
                    child_idx,
                    sessions,
                    stats,
                    children_of,
                    current_session,
                    depth + 1,
                    position + 1 == child_count,
                )
            })
            .collect(),
        depth,
        is_last,
        message_count: node_stats.message_count,
        cost: node_stats.cost,
        time: TreeTime::from(&session.time),
        is_current: current_session == Some(session.session_id.as_str()),
        shared: session.shared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(id: &str, parent: Option<&str>, created_offset: i64, updated_offset: i64) -> SessionMemory {
        let base = Utc::now() - Duration::hours(24);
        let mut memory = SessionMemory::new("proj", id, format!("title-{id}"));
        memory.parent_id = parent.map(String::from);
        memory.time = TimeStamps {
            created: base + Duration::minutes(created_offset),
            updated: base + Duration::minutes(updated_offset),
        };
        memory
    }

    #[test]
    fn test_roots_sorted_by_updated_desc() {
        let sessions = vec![
            session("old", None, 0, 10),
            session("fresh", None, 5, 100),
        ];
        let stats = vec![SessionStats::default(); 2];

        let tree = build_session_tree(&sessions, &stats, None);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "fresh");
        assert_eq!(tree[1].id, "old");
        assert!(tree[1].is_last);
    }

    #[test]
    fn test_children_sorted_by_created_asc() {
        let sessions = vec![
            session("root", None, 0, 50),
            session("late-child", Some("root"), 30, 40),
            session("early-child", Some("root"), 10, 20),
        ];
        let stats = vec![SessionStats::default(); 3];

        let tree = build_session_tree(&sessions, &stats, None);
        assert_eq!(tree.len(), 1);
        let children = &tree[0].children;
        assert_eq!(children[0].id, "early-child");
        assert_eq!(children[1].id, "late-child");
        assert!(!children[0].is_last);
        assert!(children[1].is_last);
        assert_eq!(children[0].depth, 1);
    }

    #[test]
    fn test_current_marker_and_stats() {
        let sessions = vec![session("a", None, 0, 0)];
        let stats = vec![SessionStats {
            message_count: 7,
            cost: 0.42,
        }];

        let tree = build_session_tree(&sessions, &stats, Some("a"));
        assert!(tree[0].is_current);
        assert_eq!(tree[0].message_count, 7);
        assert!((tree[0].cost - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_parent_becomes_root() {
        let sessions = vec![session("orphan", Some("gone"), 0, 0)];
        let stats = vec![SessionStats::default()];

        let tree = build_session_tree(&sessions, &stats, None);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "orphan");
    }
}
