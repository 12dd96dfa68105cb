// src/fleet/transport.rs
// Transports to tool servers: child-process stdio, streaming HTTP, SSE

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DriftError, Result, classify_status};

/// Flag set in the environment of spawned servers so they know they run
/// under the embedded runtime.
pub const EMBEDDED_RUNTIME_ENV: &str = "DRIFT_EMBEDDED_RUNTIME";

/// A bidirectional message channel to one tool server. `send` delivers a
/// complete JSON-RPC message and resolves with the paired response.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    async fn send(&self, message: &str) -> Result<String>;

    fn is_connected(&self) -> bool;

    /// Best-effort teardown
    async fn close(&self);
}

// === Stdio ===

/// Child process wired over stdin/stdout; one line-delimited JSON message
/// per request or response. Requests on the channel are serialized: the
/// stdin/stdout pair is held for the full request/response exchange.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    closed: AtomicBool,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Parent env is inherited; server-specific env layers on top
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.env(EMBEDDED_RUNTIME_ENV, "1");

        let mut child = cmd
            .spawn()
            .map_err(|err| DriftError::network(format!("failed to spawn '{command}': {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriftError::transport("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriftError::transport("child stdout unavailable"))?;

        // Drain stderr for diagnostics only
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                while let Ok(n) = reader.read_line(&mut line).await {
                    if n == 0 {
                        break;
                    }
                    debug!("[Fleet:stderr] {}", line.trim_end());
                    line.clear();
                }
            });
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ServerTransport for StdioTransport {
    async fn send(&self, message: &str) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriftError::network("stdio transport is closed"));
        }

        // Hold both halves for the whole exchange; this is what serializes
        // requests per server and keeps replies paired in order.
        let mut stdin = self.stdin.lock().await;
        let mut stdout = self.stdout.lock().await;

        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        let mut response = String::new();
        let n = stdout.read_line(&mut response).await?;
        if n == 0 {
            self.closed.store(true, Ordering::SeqCst);
            return Err(DriftError::network("tool server closed its stdout"));
        }

        Ok(response.trim_end().to_string())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Err(err) = child.kill().await {
            debug!("[Fleet] Child already gone on close: {}", err);
        }
    }
}

// === Streaming HTTP ===

/// Remote server over HTTPS POST. The response body may be plain JSON or a
/// single SSE-framed event, depending on what the endpoint negotiates.
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.to_string(),
            headers: headers.clone(),
            client,
        }
    }
}

#[async_trait]
impl ServerTransport for HttpTransport {
    async fn send(&self, message: &str) -> Result<String> {
        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.body(message.to_string()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body = response.text().await?;
        Ok(unwrap_sse_body(&body))
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Streaming endpoints answer with `data:` framed events; extract the first
/// data payload, otherwise pass the body through untouched.
fn unwrap_sse_body(body: &str) -> String {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with("event:") || trimmed.starts_with("data:")) {
        return body.to_string();
    }
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            return data.trim().to_string();
        }
    }
    body.to_string()
}

// === Server-sent events ===

/// Fallback channel: responses arrive on a long-lived SSE stream opened at
/// the same URL; requests are POSTed and paired to stream events by id.
pub struct SseTransport {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<String>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl SseTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            headers: headers.clone(),
            client: reqwest::Client::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Open the event stream and start routing responses
    pub async fn start(&self) -> Result<()> {
        let mut request = self.client.get(&self.url).header("accept", "text/event-stream");
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let mut stream = EventSource::new(request)
            .map_err(|err| DriftError::transport(format!("SSE channel setup failed: {err}")))?;

        // The stream must open before we report the transport usable
        match tokio::time::timeout(self.timeout, stream.next()).await {
            Ok(Some(Ok(Event::Open))) => {}
            Ok(Some(Ok(Event::Message(_)))) => {}
            Ok(Some(Err(err))) => {
                return Err(DriftError::network(format!("SSE channel failed to open: {err}")));
            }
            Ok(None) => return Err(DriftError::network("SSE channel closed immediately")),
            Err(_) => return Err(DriftError::timeout("SSE channel open timed out")),
        }
        self.connected.store(true, Ordering::SeqCst);

        let pending = self.pending.clone();
        let connected = self.connected.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        route_sse_message(&pending, &message.data).await;
                    }
                    Err(err) => {
                        warn!("[Fleet] SSE stream error: {}", err);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });
        *self.reader.lock().await = Some(handle);
        Ok(())
    }
}

async fn route_sse_message(
    pending: &Arc<Mutex<HashMap<i64, oneshot::Sender<String>>>>,
    data: &str,
) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        warn!("[Fleet] Dropping undecodable SSE payload");
        return;
    };
    let Some(id) = value.get("id").and_then(|id| id.as_i64()) else {
        debug!("[Fleet] Ignoring SSE notification");
        return;
    };
    let sender = pending.lock().await.remove(&id);
    match sender {
        Some(sender) => {
            let _ = sender.send(data.to_string());
        }
        None => warn!("[Fleet] SSE response for unknown request id {}", id),
    }
}

#[async_trait]
impl ServerTransport for SseTransport {
    async fn send(&self, message: &str) -> Result<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriftError::network("SSE channel is not open"));
        }

        let value: serde_json::Value = serde_json::from_str(message)?;
        let id = value.get("id").and_then(|id| id.as_i64());

        let receiver = match id {
            Some(id) => {
                let (sender, receiver) = oneshot::channel();
                self.pending.lock().await.insert(id, sender);
                Some(receiver)
            }
            None => None,
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json");
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.body(message.to_string()).send().await;

        if let Err(err) = response {
            if let Some(id) = id {
                self.pending.lock().await.remove(&id);
            }
            return Err(err.into());
        }

        let Some(receiver) = receiver else {
            return Ok(String::new());
        };
        let id = id.unwrap_or_default();
        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(DriftError::transport("SSE response channel dropped")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DriftError::timeout(format!(
                    "no SSE response for request {id} within {:?}",
                    self.timeout
                )))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
    }
}
