// src/telemetry.rs
// Fire-and-forget lifecycle pings; never blocks, never propagates errors

use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment flags that disable telemetry outright
const OPT_OUT_VARS: &[&str] = &["DO_NOT_TRACK", "DNT", "CI", "DRIFT_NO_TELEMETRY"];

/// Lifecycle ping client. Disabled when the user opted out or when no
/// stable machine identifier can be obtained.
pub struct Telemetry {
    enabled: bool,
    endpoint: String,
    machine_id: Option<String>,
    client: reqwest::Client,
}

impl Telemetry {
    pub fn new(endpoint: &str, state_root: &Path, disabled_by_config: bool) -> Self {
        let opted_out = disabled_by_config || env_opt_out();
        let machine_id = if opted_out {
            None
        } else {
            obtain_machine_id(state_root)
        };
        let enabled = !opted_out && machine_id.is_some() && !endpoint.is_empty();

        if !enabled {
            debug!("[Telemetry] Disabled (opt-out or no machine id)");
        }

        Self {
            enabled,
            endpoint: endpoint.to_string(),
            machine_id,
            client: reqwest::Client::builder()
                .timeout(PING_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send one lifecycle ping in the background. Failures are logged at
    /// debug and dropped.
    pub fn ping(&self, event: &str) {
        if !self.enabled {
            return;
        }
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let body = json!({
            "event": event,
            "machineId": self.machine_id,
            "version": env!("CARGO_PKG_VERSION"),
        });

        tokio::spawn(async move {
            match client.post(&endpoint).json(&body).send().await {
                Ok(response) => debug!("[Telemetry] {} -> {}", body["event"], response.status()),
                Err(err) => debug!("[Telemetry] Ping dropped: {}", err),
            }
        });
    }
}

fn env_opt_out() -> bool {
    OPT_OUT_VARS.iter().any(|var| {
        std::env::var(var)
            .map(|value| !value.is_empty() && value != "0" && value.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Read (or create once) the per-machine identifier. Unobtainable means
/// telemetry stays off.
fn obtain_machine_id(state_root: &Path) -> Option<String> {
    let path = machine_id_path(state_root);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    std::fs::write(&path, &id).ok()?;
    Some(id)
}

fn machine_id_path(state_root: &Path) -> PathBuf {
    state_root.join("machine-id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_machine_id_is_stable() {
        let dir = TempDir::new().unwrap();
        let first = obtain_machine_id(dir.path()).unwrap();
        let second = obtain_machine_id(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_config_opt_out_disables() {
        let dir = TempDir::new().unwrap();
        let telemetry = Telemetry::new("https://portal.example.com/ping", dir.path(), true);
        assert!(!telemetry.is_enabled());
        // Ping on a disabled client is a no-op, not an error
        telemetry.ping("startup");
    }

    #[test]
    fn test_empty_endpoint_disables() {
        let dir = TempDir::new().unwrap();
        let telemetry = Telemetry::new("", dir.path(), false);
        assert!(!telemetry.is_enabled());
    }

    #[test]
    fn test_unwritable_root_disables() {
        let telemetry = Telemetry::new(
            "https://portal.example.com/ping",
            Path::new("/proc/nonexistent/forbidden"),
            false,
        );
        assert!(!telemetry.is_enabled());
    }
}
