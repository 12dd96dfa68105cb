// src/tools/enablement.rs
// Per-session enabled-tool sets, persisted so other processes see them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;

/// Persisted shape: `enabled-tools/enabled-tools-<sanitized>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnabledToolsFile {
    #[serde(rename = "sessionID")]
    session_id: String,
    tools: Vec<String>,
    updated_at: DateTime<Utc>,
}

/// Persisted shape: `current-session.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSessionFile {
    session_id: String,
    updated_at: DateTime<Utc>,
}

/// Replace anything outside `[a-zA-Z0-9-_]` so ids are safe as file names
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Tracks which deferred tools each session has enabled. Enabling is
/// idempotent and commutative; the on-disk files are the source of truth
/// across processes.
pub struct SessionEnablement {
    root: PathBuf,
    cache: RwLock<HashMap<String, HashSet<String>>>,
    write_lock: Mutex<()>,
}

impl SessionEnablement {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    fn enabled_dir(&self) -> PathBuf {
        self.root.join("enabled-tools")
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.enabled_dir()
            .join(format!("enabled-tools-{}.json", sanitize_id(session_id)))
    }

    fn current_session_path(&self) -> PathBuf {
        self.root.join("current-session.json")
    }

    /// Enable one tool for a session
    pub async fn enable_tool(&self, session_id: &str, tool_id: &str) -> Result<()> {
        let tools = [tool_id.to_string()];
        self.enable_tools(session_id, &tools).await
    }

    /// Enable several tools for a session in one write
    pub async fn enable_tools(&self, session_id: &str, tool_ids: &[String]) -> Result<()> {
        let mut set = self.get_enabled_tools(session_id).await;
        let before = set.len();
        for tool_id in tool_ids {
            set.insert(tool_id.clone());
        }
        if set.len() == before {
            return Ok(());
        }

        debug!(
            "[Enablement] Session '{}' enabling {:?}",
            session_id, tool_ids
        );
        self.persist(session_id, &set).await?;
        self.cache
            .write()
            .await
            .insert(session_id.to_string(), set);
        Ok(())
    }

    /// The session's enabled set, from cache or disk
    pub async fn get_enabled_tools(&self, session_id: &str) -> HashSet<String> {
        if let Some(set) = self.cache.read().await.get(session_id) {
            return set.clone();
        }

        let set = match tokio::fs::read_to_string(self.session_path(session_id)).await {
            Ok(content) => serde_json::from_str::<EnabledToolsFile>(&content)
                .map(|file| file.tools.into_iter().collect())
                .unwrap_or_default(),
            Err(_) => HashSet::new(),
        };

        self.cache
            .write()
            .await
            .insert(session_id.to_string(), set.clone());
        set
    }

    pub async fn is_tool_enabled(&self, session_id: &str, tool_id: &str) -> bool {
        self.get_enabled_tools(session_id).await.contains(tool_id)
    }

    /// The lazy-mode execution rule: a tool is callable when it is not
    /// deferred, or when this session has enabled it.
    pub async fn can_execute_tool(
        &self,
        session_id: &str,
        tool_id: &str,
        index: &super::ToolSearchIndex,
    ) -> bool {
        !index.is_deferred(tool_id) || self.is_tool_enabled(session_id, tool_id).await
    }

    /// Drop the session's enablement state (memory and disk)
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.cache.write().await.remove(session_id);
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(session_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Broadcast the active session id through `current-session.json` so
    /// decoupled processes can resolve it.
    pub async fn set_current_session(&self, session_id: &str) -> Result<()> {
        let file = CurrentSessionFile {
            session_id: session_id.to_string(),
            updated_at: Utc::now(),
        };
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.current_session_path(), &serde_json::to_vec_pretty(&file)?).await
    }

    pub async fn current_session(&self) -> Option<String> {
        let content = tokio::fs::read_to_string(self.current_session_path())
            .await
            .ok()?;
        serde_json::from_str::<CurrentSessionFile>(&content)
            .ok()
            .map(|file| file.session_id)
    }

    async fn persist(&self, session_id: &str, set: &HashSet<String>) -> Result<()> {
        let mut tools: Vec<String> = set.iter().cloned().collect();
        tools.sort();
        let file = EnabledToolsFile {
            session_id: session_id.to_string(),
            tools,
            updated_at: Utc::now(),
        };
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.session_path(session_id), &serde_json::to_vec_pretty(&file)?).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
