// src/retry/reconnect.rs
// Long-lived reconnection manager for fleet clients and other resources

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::RetryOptions;
use crate::bus::{BusEvent, EventBus};
use crate::error::{DriftError, Result};

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Observable connection state for a managed resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            last_error: None,
            connected_at: None,
            disconnected_at: None,
        }
    }
}

/// A resource the manager can (re)connect and probe
#[async_trait]
pub trait Reconnectable: Send + Sync {
    /// Establish (or re-establish) the connection. Must leave the resource
    /// usable on `Ok` and fully torn down on `Err`.
    async fn connect(&self) -> Result<()>;

    /// Liveness probe; default resources are assumed healthy.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Policy knobs for a `ReconnectionManager`
#[derive(Debug, Clone)]
pub struct ReconnectionOptions {
    pub max_reconnect_attempts: u32,
    pub retry: RetryOptions,
    pub health_check_interval: Option<Duration>,
}

impl Default for ReconnectionOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            retry: RetryOptions::default(),
            health_check_interval: None,
        }
    }
}

/// Drives a `Reconnectable` through
/// `connecting → connected → disconnected → connecting → … → failed`,
/// publishing lifecycle events on the bus.
pub struct ReconnectionManager {
    name: String,
    resource: Arc<dyn Reconnectable>,
    options: ReconnectionOptions,
    state: RwLock<ConnectionState>,
    bus: EventBus,
    // Serializes concurrent reconnect triggers
    reconnect_guard: Mutex<()>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectionManager {
    pub fn new(
        name: impl Into<String>,
        resource: Arc<dyn Reconnectable>,
        options: ReconnectionOptions,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            resource,
            options,
            state: RwLock::new(ConnectionState::new()),
            bus,
            reconnect_guard: Mutex::new(()),
            health_task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.read().await.status
    }

    /// Initial connect. On success starts the health-check loop when one is
    /// configured; on failure the manager is left `disconnected` with
    /// `last_error` set, ready for `trigger_reconnect`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.set_connecting(1).await;
        match self.resource.connect().await {
            Ok(()) => {
                self.set_connected().await;
                self.spawn_health_loop().await;
                Ok(())
            }
            Err(err) => {
                self.set_disconnected(&err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Force a reconnect cycle. Retries up to `max_reconnect_attempts` with
    /// the configured backoff; reaching the cap transitions to `failed`.
    pub async fn trigger_reconnect(self: &Arc<Self>) -> Result<()> {
        let _guard = self.reconnect_guard.lock().await;

        // Another caller may have reconnected while we waited on the guard
        if self.status().await == ConnectionStatus::Connected {
            return Ok(());
        }

        let max_attempts = self.options.max_reconnect_attempts.max(1);
        for attempt in 1..=max_attempts {
            self.set_connecting(attempt).await;
            self.bus.publish(BusEvent::ServerReconnecting {
                server: self.name.clone(),
                attempt,
            });
            debug!(
                "[Reconnect] '{}' attempt {}/{}",
                self.name, attempt, max_attempts
            );

            match self.resource.connect().await {
                Ok(()) => {
                    self.set_connected().await;
                    self.spawn_health_loop().await;
                    info!("[Reconnect] '{}' recovered after {} attempt(s)", self.name, attempt);
                    return Ok(());
                }
                Err(err) => {
                    self.set_disconnected(&err.to_string()).await;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.options.retry.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        {
            let mut state = self.state.write().await;
            state.status = ConnectionStatus::Failed;
        }
        self.bus.publish(BusEvent::ReconnectFailed {
            server: self.name.clone(),
            attempts: max_attempts,
        });
        warn!(
            "[Reconnect] '{}' unavailable after {} reconnect attempts",
            self.name, max_attempts
        );
        Err(DriftError::network(format!(
            "server '{}' unavailable after {} reconnect attempts",
            self.name, max_attempts
        )))
    }

    /// Record a disconnect observed by the caller (e.g. a transport error
    /// mid-request). Does not reconnect by itself.
    pub async fn mark_disconnected(&self, error: &str) {
        if self.status().await == ConnectionStatus::Connected {
            self.set_disconnected(error).await;
        }
    }

    /// Stop the health-check loop. The resource itself is torn down by its
    /// owner.
    pub async fn shutdown(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
    }

    async fn set_connecting(&self, attempt: u32) {
        let mut state = self.state.write().await;
        state.status = ConnectionStatus::Connecting;
        state.attempts = attempt;
    }

    async fn set_connected(&self) {
        {
            let mut state = self.state.write().await;
            state.status = ConnectionStatus::Connected;
            state.attempts = 0;
            state.last_error = None;
            state.connected_at = Some(Utc::now());
        }
        self.bus.publish(BusEvent::ServerConnected {
            server: self.name.clone(),
        });
    }

    async fn set_disconnected(&self, error: &str) {
        {
            let mut state = self.state.write().await;
            state.status = ConnectionStatus::Disconnected;
            state.last_error = Some(error.to_string());
            state.disconnected_at = Some(Utc::now());
        }
        self.bus.publish(BusEvent::ServerDisconnected {
            server: self.name.clone(),
            error: Some(error.to_string()),
        });
    }

    fn spawn_health_loop<'a>(self: &'a Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Some(interval) = self.options.health_check_interval else {
                return;
            };

            let mut task_slot = self.health_task.lock().await;
            if let Some(old) = task_slot.take() {
                old.abort();
            }

            let manager = Arc::downgrade(self);
            *task_slot = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // first tick fires immediately

                loop {
                    ticker.tick().await;
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if manager.status().await != ConnectionStatus::Connected {
                        continue;
                    }
                    if let Err(err) = manager.resource.health_check().await {
                        warn!("[Reconnect] '{}' health check failed: {}", manager.name, err);
                        manager.set_disconnected(&err.to_string()).await;
                        let _ = manager.trigger_reconnect().await;
                    }
                }
            }));
        })
    }
}
