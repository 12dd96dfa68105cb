// src/orchestrator/patterns.rs
// Learned execution patterns: what worked, what failed, at what cost

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, Result};

/// Exponential moving weight for success rate and duration updates
const EMA_ALPHA: f64 = 0.3;
const MAX_FAILURES: usize = 100;

/// Rolling statistics for one task type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPattern {
    pub task_type: String,
    pub agent_sequence: Vec<String>,
    pub tool_sequence: Vec<String>,
    pub avg_duration_ms: f64,
    /// Exponentially weighted over past runs
    pub success_rate: f64,
    pub runs: u64,
    pub updated_at: DateTime<Utc>,
}

/// One classified failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePattern {
    pub task_type: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatternsFile {
    #[serde(default)]
    patterns: HashMap<String, ExecutionPattern>,
    #[serde(default)]
    failures: Vec<FailurePattern>,
}

/// File-backed store of execution and failure patterns
pub struct PatternStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PatternStore {
    pub fn new(state_root: impl AsRef<Path>) -> Self {
        Self {
            path: state_root.as_ref().join("patterns.json"),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> PatternsFile {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => PatternsFile::default(),
        }
    }

    async fn save(&self, file: &PatternsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Look up the learned pattern for a task type
    pub async fn lookup(&self, task_type: &str) -> Option<ExecutionPattern> {
        self.load().await.patterns.get(task_type).cloned()
    }

    /// Fold a successful run into the pattern for its task type
    pub async fn record_success(
        &self,
        task_type: &str,
        agent_sequence: &[String],
        tool_sequence: &[String],
        duration_ms: u64,
    ) -> Result<ExecutionPattern> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await;

        let pattern = file
            .patterns
            .entry(task_type.to_string())
            .and_modify(|p| {
                p.agent_sequence = agent_sequence.to_vec();
                p.tool_sequence = tool_sequence.to_vec();
                p.avg_duration_ms =
                    EMA_ALPHA * duration_ms as f64 + (1.0 - EMA_ALPHA) * p.avg_duration_ms;
                p.success_rate = EMA_ALPHA + (1.0 - EMA_ALPHA) * p.success_rate;
                p.runs += 1;
                p.updated_at = Utc::now();
            })
            .or_insert_with(|| ExecutionPattern {
                task_type: task_type.to_string(),
                agent_sequence: agent_sequence.to_vec(),
                tool_sequence: tool_sequence.to_vec(),
                avg_duration_ms: duration_ms as f64,
                success_rate: 1.0,
                runs: 1,
                updated_at: Utc::now(),
            })
            .clone();

        self.save(&file).await?;
        Ok(pattern)
    }

    /// Record a failed run: decay the success rate and keep the classified
    /// failure (bounded history).
    pub async fn record_failure(
        &self,
        task_type: &str,
        error_kind: ErrorKind,
        message: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await;

        if let Some(pattern) = file.patterns.get_mut(task_type) {
            pattern.success_rate = (1.0 - EMA_ALPHA) * pattern.success_rate;
            pattern.runs += 1;
            pattern.updated_at = Utc::now();
        }

        file.failures.push(FailurePattern {
            task_type: task_type.to_string(),
            error_kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        let excess = file.failures.len().saturating_sub(MAX_FAILURES);
        if excess > 0 {
            file.failures.drain(..excess);
        }

        self.save(&file).await?;
        Ok(())
    }

    pub async fn recent_failures(&self, task_type: &str, limit: usize) -> Vec<FailurePattern> {
        let file = self.load().await;
        file.failures
            .iter()
            .rev()
            .filter(|f| f.task_type == task_type)
            .take(limit)
            .cloned()
            .collect()
    }
}
