// src/memory/store.rs
// Atomic JSON + append-only log storage for sessions and learnings
//
// Layout under the state root:
//   projects/<projectID>/sessions/<sessionID>/memory.json
//   projects/<projectID>/sessions/<sessionID>/worklog.jsonl
//   projects/<projectID>/learnings.json
//   learnings.json                                (global)

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    CurrentStatus, Learning, LearningsFile, MAX_COMPLETED, MAX_DISCUSSION_POINTS,
    MAX_OPEN_QUESTIONS, SessionMemory,
};
use super::worklog::{WorkLogEntry, WorkLogType};
use crate::error::{DriftError, Result};

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

type SessionKey = (String, String);

struct StoreInner {
    root: PathBuf,
    // One write lock per file namespace; reads are shared
    memory_lock: RwLock<()>,
    worklog_lock: RwLock<()>,
    learnings_lock: RwLock<()>,
    cache: RwLock<HashMap<SessionKey, SessionMemory>>,
    pending_flush: Mutex<HashSet<SessionKey>>,
    debounce: Duration,
}

/// Handle to the on-disk memory store. Clones share the same state root,
/// caches, and locks.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_debounce(root, DEBOUNCE_WINDOW)
    }

    /// The debounce window coalesces bursts of small updates into one
    /// full-file write; correctness does not depend on it.
    pub fn with_debounce(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                memory_lock: RwLock::new(()),
                worklog_lock: RwLock::new(()),
                learnings_lock: RwLock::new(()),
                cache: RwLock::new(HashMap::new()),
                pending_flush: Mutex::new(HashSet::new()),
                debounce,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn session_dir(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.inner
            .root
            .join("projects")
            .join(project_id)
            .join("sessions")
            .join(session_id)
    }

    fn memory_path(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.session_dir(project_id, session_id).join("memory.json")
    }

    fn worklog_path(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.session_dir(project_id, session_id).join("worklog.jsonl")
    }

    fn project_learnings_path(&self, project_id: &str) -> PathBuf {
        self.inner
            .root
            .join("projects")
            .join(project_id)
            .join("learnings.json")
    }

    fn global_learnings_path(&self) -> PathBuf {
        self.inner.root.join("learnings.json")
    }

    // === Session memory ===

    /// Create and persist a fresh session memory. Fails if one already exists.
    pub async fn create(
        &self,
        project_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<SessionMemory> {
        if self.exists(project_id, session_id).await {
            return Err(DriftError::validation(format!(
                "session '{session_id}' already exists in project '{project_id}'"
            )));
        }

        let memory = SessionMemory::new(project_id, session_id, title);
        self.write(project_id, &memory).await?;
        Ok(memory)
    }

    pub async fn exists(&self, project_id: &str, session_id: &str) -> bool {
        if self
            .inner
            .cache
            .read()
            .await
            .contains_key(&key(project_id, session_id))
        {
            return true;
        }
        self.memory_path(project_id, session_id).exists()
    }

    /// Read session memory, preferring the in-memory view over disk
    pub async fn read(&self, project_id: &str, session_id: &str) -> Result<SessionMemory> {
        if let Some(memory) = self.inner.cache.read().await.get(&key(project_id, session_id)) {
            return Ok(memory.clone());
        }

        let path = self.memory_path(project_id, session_id);
        let content = {
            let _shared = self.inner.memory_lock.read().await;
            tokio::fs::read_to_string(&path).await.map_err(|_| {
                DriftError::not_found(format!(
                    "session '{session_id}' not found in project '{project_id}'"
                ))
            })?
        };
        let memory: SessionMemory = serde_json::from_str(&content)?;

        self.inner
            .cache
            .write()
            .await
            .insert(key(project_id, session_id), memory.clone());
        Ok(memory)
    }

    /// Persist session memory immediately (atomic write-and-rename)
    pub async fn write(&self, project_id: &str, memory: &SessionMemory) -> Result<()> {
        let path = self.memory_path(project_id, &memory.session_id);
        let bytes = serde_json::to_vec_pretty(memory)?;
        {
            let _exclusive = self.inner.memory_lock.write().await;
            atomic_write(&path, &bytes).await?;
        }
        self.inner
            .cache
            .write()
            .await
            .insert(key(project_id, &memory.session_id), memory.clone());
        Ok(())
    }

    /// Apply a mutation to the in-memory view, bump `time.updated`, and
    /// schedule a debounced flush. Returns the updated memory. The "memory"
    /// writer lock is held for the whole read-modify-write, so concurrent
    /// updates never lose each other's changes.
    pub async fn update<F>(
        &self,
        project_id: &str,
        session_id: &str,
        mutate: F,
    ) -> Result<SessionMemory>
    where
        F: FnOnce(&mut SessionMemory),
    {
        let _exclusive = self.inner.memory_lock.write().await;

        let cached = self
            .inner
            .cache
            .read()
            .await
            .get(&key(project_id, session_id))
            .cloned();
        let mut memory = match cached {
            Some(memory) => memory,
            None => {
                let path = self.memory_path(project_id, session_id);
                let content = tokio::fs::read_to_string(&path).await.map_err(|_| {
                    DriftError::not_found(format!(
                        "session '{session_id}' not found in project '{project_id}'"
                    ))
                })?;
                serde_json::from_str(&content)?
            }
        };

        mutate(&mut memory);
        memory.time.touch();

        self.inner
            .cache
            .write()
            .await
            .insert(key(project_id, session_id), memory.clone());
        drop(_exclusive);

        self.schedule_flush(project_id, session_id).await;
        Ok(memory)
    }

    pub async fn update_title(
        &self,
        project_id: &str,
        session_id: &str,
        title: &str,
        generated: bool,
    ) -> Result<()> {
        self.update(project_id, session_id, |memory| {
            memory.title = title.to_string();
            memory.title_generated = generated;
        })
        .await?;
        Ok(())
    }

    pub async fn update_status<F>(&self, project_id: &str, session_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut CurrentStatus),
    {
        let mut truncated = Vec::new();
        self.update(project_id, session_id, |memory| {
            mutate(&mut memory.current_status);
            truncated = truncate_status(&mut memory.current_status);
        })
        .await?;
        self.log_truncations(project_id, session_id, &truncated).await;
        Ok(())
    }

    pub async fn add_completed(&self, project_id: &str, session_id: &str, item: &str) -> Result<()> {
        self.update_status(project_id, session_id, |status| {
            status.completed.push(item.to_string());
        })
        .await
    }

    pub async fn add_key_result(&self, project_id: &str, session_id: &str, result: &str) -> Result<()> {
        self.update(project_id, session_id, |memory| {
            if !memory.key_results.iter().any(|r| r == result) {
                memory.key_results.push(result.to_string());
            }
        })
        .await?;
        Ok(())
    }

    /// Record a learning on the session and in the work log
    pub async fn add_learning(
        &self,
        project_id: &str,
        session_id: &str,
        learning: Learning,
    ) -> Result<()> {
        let learning = learning.with_session(session_id.to_string());
        let summary = learning.insight.clone();
        self.update(project_id, session_id, |memory| {
            memory.learnings.push(learning);
        })
        .await?;

        self.append_work_log(
            project_id,
            session_id,
            WorkLogEntry::new(WorkLogType::Learning, summary),
        )
        .await
    }

    /// Promote a learning to the project level. Duplicates (same insight and
    /// category) are not re-inserted; returns whether the learning was added.
    pub async fn promote_learning_to_project(
        &self,
        project_id: &str,
        learning: &Learning,
    ) -> Result<bool> {
        self.promote_learning(&self.project_learnings_path(project_id), learning)
            .await
    }

    /// Promote a learning to the global learnings file
    pub async fn promote_learning_to_global(&self, learning: &Learning) -> Result<bool> {
        self.promote_learning(&self.global_learnings_path(), learning)
            .await
    }

    async fn promote_learning(&self, path: &Path, learning: &Learning) -> Result<bool> {
        let _exclusive = self.inner.learnings_lock.write().await;

        let mut file: LearningsFile = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(_) => LearningsFile::default(),
        };

        let duplicate = file
            .learnings
            .iter()
            .any(|l| l.insight == learning.insight && l.category == learning.category);
        if duplicate {
            debug!("[Memory] Skipping duplicate learning '{}'", learning.insight);
            return Ok(false);
        }

        file.learnings.push(learning.clone());
        atomic_write(path, &serde_json::to_vec_pretty(&file)?).await?;
        Ok(true)
    }

    /// Render the session's memory as a markdown document
    pub async fn export_as_markdown(&self, project_id: &str, session_id: &str) -> Result<String> {
        let memory = self.read(project_id, session_id).await?;
        Ok(super::export::export_as_markdown(&memory))
    }

    pub async fn read_project_learnings(&self, project_id: &str) -> Result<Vec<Learning>> {
        let _shared = self.inner.learnings_lock.read().await;
        match tokio::fs::read_to_string(self.project_learnings_path(project_id)).await {
            Ok(content) => Ok(serde_json::from_str::<LearningsFile>(&content)?.learnings),
            Err(_) => Ok(Vec::new()),
        }
    }

    // === Work log ===

    /// Append one entry to the session's work log. Appends are written
    /// through immediately; the log is the authoritative history.
    pub async fn append_work_log(
        &self,
        project_id: &str,
        session_id: &str,
        entry: WorkLogEntry,
    ) -> Result<()> {
        let path = self.worklog_path(project_id, session_id);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _exclusive = self.inner.worklog_lock.write().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the work log in file order; `limit` keeps the most recent entries
    pub async fn read_work_log(
        &self,
        project_id: &str,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WorkLogEntry>> {
        let path = self.worklog_path(project_id, session_id);
        let content = {
            let _shared = self.inner.worklog_lock.read().await;
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(_) => return Ok(Vec::new()),
            }
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("[Memory] Skipping malformed work-log line: {}", err),
            }
        }

        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    // === Sessions listing ===

    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<String>> {
        let sessions_dir = self.inner.root.join("projects").join(project_id).join("sessions");
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&sessions_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(ids),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().join("memory.json").exists() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    // === Flushing ===

    /// Write the cached view of one session to disk now
    pub async fn flush(&self, project_id: &str, session_id: &str) -> Result<()> {
        let memory = {
            let cache = self.inner.cache.read().await;
            cache.get(&key(project_id, session_id)).cloned()
        };
        if let Some(memory) = memory {
            self.write(project_id, &memory).await?;
        }
        Ok(())
    }

    /// Flush every cached session (used on shutdown)
    pub async fn flush_all(&self) -> Result<()> {
        let keys: Vec<SessionKey> = self.inner.cache.read().await.keys().cloned().collect();
        for (project_id, session_id) in keys {
            if let Err(err) = self.flush(&project_id, &session_id).await {
                warn!(
                    "[Memory] Flush failed for {}/{}: {}",
                    project_id, session_id, err
                );
            }
        }
        Ok(())
    }

    async fn schedule_flush(&self, project_id: &str, session_id: &str) {
        let flush_key = key(project_id, session_id);
        {
            let mut pending = self.inner.pending_flush.lock().await;
            if !pending.insert(flush_key.clone()) {
                // A flush is already scheduled inside the window
                return;
            }
        }

        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.inner.debounce).await;
            store.inner.pending_flush.lock().await.remove(&flush_key);
            if let Err(err) = store.flush(&flush_key.0, &flush_key.1).await {
                // The in-memory view stays authoritative; the caller's
                // operation already succeeded.
                warn!(
                    "[Memory] Debounced flush failed for {}/{}: {}",
                    flush_key.0, flush_key.1, err
                );
            }
        });
    }

    async fn log_truncations(&self, project_id: &str, session_id: &str, truncated: &[String]) {
        for summary in truncated {
            if let Err(err) = self
                .append_work_log(
                    project_id,
                    session_id,
                    WorkLogEntry::new(WorkLogType::Compaction, summary.clone()),
                )
                .await
            {
                warn!("[Memory] Failed to log compaction: {}", err);
            }
        }
    }
}

fn key(project_id: &str, session_id: &str) -> SessionKey {
    (project_id.to_string(), session_id.to_string())
}

/// Drop oldest entries past the per-list caps; returns compaction summaries
fn truncate_status(status: &mut CurrentStatus) -> Vec<String> {
    let mut summaries = Vec::new();
    for (list, cap, name) in [
        (&mut status.completed, MAX_COMPLETED, "completed"),
        (&mut status.discussion_points, MAX_DISCUSSION_POINTS, "discussion points"),
        (&mut status.open_questions, MAX_OPEN_QUESTIONS, "open questions"),
    ] {
        if list.len() > cap {
            let dropped = list.len() - cap;
            list.drain(..dropped);
            summaries.push(format!("Compacted {name}: dropped {dropped} oldest entries"));
        }
    }
    summaries
}

/// Write to `<path>.tmp` then rename into place
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, MemoryStore) {
        let dir = TempDir::new().unwrap();
        // Tiny debounce keeps the tests fast
        let store = MemoryStore::with_debounce(dir.path(), Duration::from_millis(10));
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_read_round_trip() {
        let (_dir, store) = test_store();
        let created = store.create("proj", "sess", "Incident widget").await.unwrap();
        let read = store.read("proj", "sess").await.unwrap();
        assert_eq!(read.session_id, created.session_id);
        assert_eq!(read.title, "Incident widget");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let (_dir, store) = test_store();
        store.create("proj", "sess", "one").await.unwrap();
        let err = store.create("proj", "sess", "two").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_read_missing_session_is_not_found() {
        let (_dir, store) = test_store();
        let err = store.read("proj", "ghost").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_updated_is_monotonic() {
        let (_dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();

        let mut last = store.read("proj", "sess").await.unwrap().time.updated;
        for i in 0..5 {
            let memory = store
                .update("proj", "sess", |m| m.title = format!("t{i}"))
                .await
                .unwrap();
            assert!(memory.time.updated >= last);
            last = memory.time.updated;
        }
    }

    #[tokio::test]
    async fn test_debounced_update_lands_on_disk() {
        let (dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();
        store.add_completed("proj", "sess", "built the widget").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let raw = std::fs::read_to_string(
            dir.path()
                .join("projects/proj/sessions/sess/memory.json"),
        )
        .unwrap();
        let on_disk: SessionMemory = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.current_status.completed, vec!["built the widget"]);
    }

    #[tokio::test]
    async fn test_worklog_appends_in_order() {
        let (_dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();

        for i in 0..10 {
            store
                .append_work_log(
                    "proj",
                    "sess",
                    WorkLogEntry::new(WorkLogType::ToolCall, format!("call-{i}")),
                )
                .await
                .unwrap();
        }

        let entries = store.read_work_log("proj", "sess", None).await.unwrap();
        assert_eq!(entries.len(), 10);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.summary, format!("call-{i}"));
        }

        let tail = store.read_work_log("proj", "sess", Some(3)).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].summary, "call-7");
    }

    #[tokio::test]
    async fn test_status_truncation_logs_compaction() {
        let (_dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();

        for i in 0..(MAX_COMPLETED + 5) {
            store
                .add_completed("proj", "sess", &format!("item-{i}"))
                .await
                .unwrap();
        }

        let memory = store.read("proj", "sess").await.unwrap();
        assert_eq!(memory.current_status.completed.len(), MAX_COMPLETED);
        // Oldest entries were dropped
        assert_eq!(memory.current_status.completed[0], "item-5");

        let entries = store.read_work_log("proj", "sess", None).await.unwrap();
        assert!(
            entries
                .iter()
                .any(|e| e.entry_type == WorkLogType::Compaction)
        );
    }

    #[tokio::test]
    async fn test_project_learning_dedup() {
        let (_dir, store) = test_store();
        let learning = Learning::new("pattern", "research tasks parallelize well");

        assert!(store.promote_learning_to_project("proj", &learning).await.unwrap());
        // Same insight + category is not re-inserted, even with a fresh id
        let twin = Learning::new("pattern", "research tasks parallelize well");
        assert!(!store.promote_learning_to_project("proj", &twin).await.unwrap());

        let learnings = store.read_project_learnings("proj").await.unwrap();
        assert_eq!(learnings.len(), 1);
    }

    #[tokio::test]
    async fn test_add_learning_records_worklog_entry() {
        let (_dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();
        store
            .add_learning("proj", "sess", Learning::new("gotcha", "mind the rate limits"))
            .await
            .unwrap();

        let memory = store.read("proj", "sess").await.unwrap();
        assert_eq!(memory.learnings.len(), 1);
        assert_eq!(memory.learnings[0].session_id.as_deref(), Some("sess"));

        let entries = store.read_work_log("proj", "sess", None).await.unwrap();
        assert!(entries.iter().any(|e| e.entry_type == WorkLogType::Learning));
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (_dir, store) = test_store();
        store.create("proj", "b-sess", "b").await.unwrap();
        store.create("proj", "a-sess", "a").await.unwrap();
        store.create("other", "c-sess", "c").await.unwrap();

        let sessions = store.list_sessions("proj").await.unwrap();
        assert_eq!(sessions, vec!["a-sess", "b-sess"]);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let (dir, store) = test_store();
        store.create("proj", "sess", "t").await.unwrap();
        store.flush("proj", "sess").await.unwrap();

        let session_dir = dir.path().join("projects/proj/sessions/sess");
        let leftovers: Vec<_> = std::fs::read_dir(&session_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
