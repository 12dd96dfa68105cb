// src/collaborator.rs
// Seam to the language collaborator that executes individual task prompts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One part of a collaborator message: plain text or a completed tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Tool {
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        output: String,
        #[serde(default)]
        success: bool,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

/// Prompt for one scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub session_id: Option<String>,
    /// Specialized agent handling the task (falls back to the plan's base agent)
    pub agent: String,
    pub model: Option<String>,
    pub parts: Vec<MessagePart>,
}

/// Collaborator reply: the parts produced while working the prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub parts: Vec<MessagePart>,
}

impl PromptResponse {
    /// Concatenate the text parts into the task output
    pub fn text_output(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Outputs of tool calls that completed successfully
    pub fn completed_tool_outputs(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Tool {
                    output,
                    success: true,
                    ..
                } => Some(output.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// The orchestration runtime does not interpret natural language itself; a
/// collaborator turns task prompts into message parts. Implementations wrap
/// an LLM binding or a subprocess.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse>;
}

/// Collaborator backed by a spawned command. Each prompt writes one JSON
/// request line to the child's stdin and reads one JSON response line:
/// `{"parts": [...]}`.
pub struct SubprocessCollaborator {
    command: String,
    args: Vec<String>,
    timeout: std::time::Duration,
}

impl SubprocessCollaborator {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: std::time::Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Collaborator for SubprocessCollaborator {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse> {
        use crate::error::DriftError;
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                DriftError::network(format!("failed to spawn collaborator '{}': {err}", self.command))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriftError::transport("collaborator stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriftError::transport("collaborator stdout unavailable"))?;

        let mut body = serde_json::to_string(&request)?;
        body.push('\n');
        stdin.write_all(body.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        let mut line = String::new();
        let mut reader = BufReader::new(stdout);
        tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| DriftError::timeout("collaborator did not answer in time"))??;

        if line.trim().is_empty() {
            return Err(DriftError::transport("collaborator produced no response"));
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_output_joins_text_parts() {
        let response = PromptResponse {
            parts: vec![
                MessagePart::text("first"),
                MessagePart::Tool {
                    name: "snow_query_incidents".into(),
                    arguments: json!({"state": "open"}),
                    output: "{}".into(),
                    success: true,
                },
                MessagePart::text("second"),
            ],
        };
        assert_eq!(response.text_output(), "first\nsecond");
    }

    #[test]
    fn test_completed_tool_outputs_skips_failures() {
        let response = PromptResponse {
            parts: vec![
                MessagePart::Tool {
                    name: "a".into(),
                    arguments: Value::Null,
                    output: "ok".into(),
                    success: true,
                },
                MessagePart::Tool {
                    name: "b".into(),
                    arguments: Value::Null,
                    output: "boom".into(),
                    success: false,
                },
            ],
        };
        assert_eq!(response.completed_tool_outputs(), vec!["ok"]);
    }

    #[test]
    fn test_part_serialization_shape() {
        let part = MessagePart::text("hello");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");
    }
}
