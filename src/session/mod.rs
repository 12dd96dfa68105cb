// src/session/mod.rs
// Session identity, fork relations, and the project session tree

pub mod render;
pub mod tree;

pub use tree::SessionTreeNode;

use tracing::debug;

use crate::error::{DriftError, Result};
use crate::memory::worklog::WorkLogType;
use crate::memory::{MemoryStore, SessionMemory};

/// Manages session lifecycle and fork relations on top of the memory store
#[derive(Clone)]
pub struct SessionManager {
    store: MemoryStore,
}

impl SessionManager {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Create a root session
    pub async fn create_session(
        &self,
        project_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<SessionMemory> {
        self.store.create(project_id, session_id, title).await
    }

    /// Fork a new session from an existing parent in the same project
    pub async fn fork_session(
        &self,
        project_id: &str,
        parent_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<SessionMemory> {
        if !self.store.exists(project_id, parent_id).await {
            return Err(DriftError::not_found(format!(
                "cannot fork: parent session '{parent_id}' not found in project '{project_id}'"
            )));
        }

        let mut memory = self.store.create(project_id, session_id, title).await?;
        memory.parent_id = Some(parent_id.to_string());
        self.store.write(project_id, &memory).await?;
        debug!("[Session] Forked '{}' from '{}'", session_id, parent_id);
        Ok(memory)
    }

    pub async fn get_session(&self, project_id: &str, session_id: &str) -> Result<SessionMemory> {
        self.store.read(project_id, session_id).await
    }

    /// Ordered root-to-leaf chain of session ids ending at `session_id`
    pub async fn get_ancestry(&self, project_id: &str, session_id: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut cursor = Some(session_id.to_string());

        while let Some(id) = cursor {
            // A broken parent link would otherwise loop forever
            if chain.contains(&id) {
                return Err(DriftError::internal(format!(
                    "session ancestry cycle detected at '{id}'"
                )));
            }
            let memory = self.store.read(project_id, &id).await?;
            chain.push(id);
            cursor = memory.parent_id;
        }

        chain.reverse();
        Ok(chain)
    }

    /// All sessions of a project, in no particular order
    pub async fn list_project_sessions(&self, project_id: &str) -> Result<Vec<SessionMemory>> {
        let mut sessions = Vec::new();
        for session_id in self.store.list_sessions(project_id).await? {
            match self.store.read(project_id, &session_id).await {
                Ok(memory) => sessions.push(memory),
                Err(err) => debug!("[Session] Skipping unreadable session '{}': {}", session_id, err),
            }
        }
        Ok(sessions)
    }

    /// Build the fork tree for a project; see `tree::build_session_tree`
    pub async fn build_session_tree(
        &self,
        project_id: &str,
        current_session: Option<&str>,
    ) -> Result<Vec<SessionTreeNode>> {
        let sessions = self.list_project_sessions(project_id).await?;
        let mut stats = Vec::new();
        for memory in &sessions {
            let entries = self
                .store
                .read_work_log(project_id, &memory.session_id, None)
                .await?;
            let message_count = entries
                .iter()
                .filter(|e| {
                    matches!(
                        e.entry_type,
                        WorkLogType::UserRequest | WorkLogType::AiResponse
                    )
                })
                .count() as u64;
            let cost = entries
                .iter()
                .filter_map(|e| e.metadata.as_ref())
                .filter_map(|m| m.get("cost").and_then(|c| c.as_f64()))
                .sum::<f64>();
            stats.push(tree::SessionStats {
                message_count,
                cost,
            });
        }

        Ok(tree::build_session_tree(&sessions, &stats, current_session))
    }
}
