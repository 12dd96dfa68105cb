// tests/fleet_reconnect_test.rs
// Fleet lifecycle against a scripted stdio tool server: connect, verify,
// dispatch, crash, reconnect, and exhaustion

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use serde_json::json;
use tempfile::TempDir;

use drift::bus::{EventBus, EventKind};
use drift::fleet::{Fleet, FleetConfig, RetryPolicy, ServerConfig, TransportKind};
use drift::retry::ConnectionStatus;

/// A tool server in shell: answers tools.list / tools.call / prompts.list
/// with correctly paired request ids.
const STUB_SERVER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *"tools.list"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"query_incidents","description":"Query open incidents"},{"name":"create_incident","description":"Create an incident"}]}}\n' "$id"
      ;;
    *"tools.call"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"sys_id\\":\\"deadbeefdeadbeefdeadbeefdeadbeef\\"}"}],"isError":false}}\n' "$id"
      ;;
    *"prompts.list"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"prompts":[{"name":"triage","description":"Incident triage template"}]}}\n' "$id"
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"no such method"}}\n' "$id"
      ;;
  esac
done
"#;

/// First run: answer the verification call, then die. Later runs (marker
/// file present) behave like the full stub. Exercises crash + recovery.
const FLAKY_SERVER: &str = r#"#!/bin/sh
marker="$1"
if [ -f "$marker" ]; then
  while IFS= read -r line; do
    id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
    case "$line" in
      *"tools.list"*)
        printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"query_incidents","description":"Query open incidents"}]}}\n' "$id"
        ;;
      *"tools.call"*)
        printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"{\\"ok\\":true}"}],"isError":false}}\n' "$id"
        ;;
    esac
  done
else
  IFS= read -r line
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"query_incidents","description":"Query open incidents"}]}}\n' "$id"
  touch "$marker"
  exit 0
fi
"#;

fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay_ms: 10,
        max_delay_ms: 20,
        backoff_factor: 1.5,
        jitter: false,
        auto_reconnect: true,
        health_check_interval_ms: None,
    }
}

fn server_config(name: &str, command: &str, args: Vec<String>) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        transport: TransportKind::Local {
            command: command.to_string(),
            args,
            env: HashMap::new(),
        },
        enabled: true,
        timeout_ms: 3_000,
        retry: fast_retry(),
    }
}

fn write_fleet_config(dir: &TempDir, servers: &[ServerConfig]) -> PathBuf {
    let path = dir.path().join("servers.json");
    let config = FleetConfig {
        servers: servers.to_vec(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

async fn booted_fleet(dir: &TempDir, servers: &[ServerConfig]) -> Arc<Fleet> {
    let config_path = write_fleet_config(dir, servers);
    let fleet = Fleet::new(vec![config_path], EventBus::new());
    fleet.boot().await.unwrap();
    fleet
}

#[tokio::test]
async fn boot_verifies_and_namespaces_tools() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let fleet = booted_fleet(
        &dir,
        &[server_config("itsm", "/bin/sh", vec![script.display().to_string()])],
    )
    .await;

    let statuses = fleet.status().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, ConnectionStatus::Connected);
    assert_eq!(statuses[0].tool_count, 2);

    let tools = fleet.tools().await;
    assert!(tools.contains_key("itsm_query_incidents"));
    assert!(tools.contains_key("itsm_create_incident"));
    let (server, tool) = &tools["itsm_query_incidents"];
    assert_eq!(server, "itsm");
    assert_eq!(tool.name, "query_incidents");

    fleet.shutdown().await;
}

#[tokio::test]
async fn dispatch_returns_tool_result() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let fleet = booted_fleet(
        &dir,
        &[server_config("itsm", "/bin/sh", vec![script.display().to_string()])],
    )
    .await;

    let result = fleet
        .call_tool("itsm", "query_incidents", json!({"state": "open"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert!(result.first_text().unwrap().contains("deadbeef"));

    // Serialized channel: several calls in sequence stay paired
    for _ in 0..3 {
        let result = fleet
            .call_tool("itsm", "create_incident", json!({"short_description": "x"}))
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    fleet.shutdown().await;
}

#[tokio::test]
async fn prompts_aggregate_across_fleet() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let fleet = booted_fleet(
        &dir,
        &[server_config("itsm", "/bin/sh", vec![script.display().to_string()])],
    )
    .await;

    let prompts = fleet.list_prompts().await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].0, "itsm");
    assert_eq!(prompts[0].1.name, "triage");

    fleet.shutdown().await;
}

#[tokio::test]
async fn crashed_server_recovers_on_next_dispatch() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "flaky.sh", FLAKY_SERVER);
    let marker = dir.path().join("recovered.marker");
    let fleet = booted_fleet(
        &dir,
        &[server_config(
            "itsm",
            "/bin/sh",
            vec![script.display().to_string(), marker.display().to_string()],
        )],
    )
    .await;

    // Boot verified against the first (short-lived) process
    assert_eq!(fleet.status().await[0].status, ConnectionStatus::Connected);

    // The process exited after verification: the first dispatch fails and
    // marks the server disconnected
    let err = fleet
        .call_tool("itsm", "query_incidents", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        drift::ErrorKind::Network | drift::ErrorKind::Transport | drift::ErrorKind::Timeout
    ));

    // The next dispatch reconnects (marker file now exists, the stub stays
    // up) and the previously visible tool set is restored
    let result = fleet
        .call_tool("itsm", "query_incidents", json!({}))
        .await
        .unwrap();
    assert!(result.first_text().unwrap().contains("ok"));
    assert!(fleet.tools().await.contains_key("itsm_query_incidents"));

    fleet.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_exhausts_reconnects_and_fails() {
    let dir = TempDir::new().unwrap();
    let bus = EventBus::new();

    let reconnect_failures = Arc::new(AtomicU32::new(0));
    let counter = reconnect_failures.clone();
    let _sub = bus.subscribe(EventKind::ReconnectFailed, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // `true` exits immediately: verification can never succeed
    let config_path = write_fleet_config(&dir, &[server_config("dead", "true", Vec::new())]);
    let fleet = Fleet::new(vec![config_path], bus);
    fleet.boot().await.unwrap();

    assert_ne!(fleet.status().await[0].status, ConnectionStatus::Connected);

    let err = fleet
        .call_tool("dead", "query_incidents", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unavailable"));
    assert_eq!(fleet.status().await[0].status, ConnectionStatus::Failed);
    assert_eq!(reconnect_failures.load(Ordering::SeqCst), 1);

    // The failed server never contributes tools
    assert!(fleet.tools().await.is_empty());

    fleet.shutdown().await;
}

#[tokio::test]
async fn reload_adds_new_servers_without_touching_existing() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let first = server_config("itsm", "/bin/sh", vec![script.display().to_string()]);
    let config_path = write_fleet_config(&dir, std::slice::from_ref(&first));

    let fleet = Fleet::new(vec![config_path.clone()], EventBus::new());
    fleet.boot().await.unwrap();
    assert_eq!(fleet.server_count().await, 1);

    // Add a second server on disk, then reload
    let second = server_config("catalog", "/bin/sh", vec![script.display().to_string()]);
    std::fs::write(
        &config_path,
        serde_json::to_string_pretty(&FleetConfig {
            servers: vec![first, second],
        })
        .unwrap(),
    )
    .unwrap();

    let added = fleet.reload().await.unwrap();
    assert_eq!(added, vec!["catalog"]);
    assert_eq!(fleet.server_count().await, 2);

    let tools = fleet.tools().await;
    assert!(tools.contains_key("itsm_query_incidents"));
    assert!(tools.contains_key("catalog_query_incidents"));

    fleet.shutdown().await;
}

#[tokio::test]
async fn restart_recreates_from_fresh_config() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let fleet = booted_fleet(
        &dir,
        &[server_config("itsm", "/bin/sh", vec![script.display().to_string()])],
    )
    .await;

    fleet.restart("itsm").await.unwrap();
    assert_eq!(fleet.status().await[0].status, ConnectionStatus::Connected);

    let result = fleet
        .call_tool("itsm", "query_incidents", json!({}))
        .await
        .unwrap();
    assert!(!result.is_error);

    fleet.shutdown().await;
}

#[tokio::test]
async fn disabled_servers_are_not_started() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "stub.sh", STUB_SERVER);
    let mut disabled = server_config("itsm", "/bin/sh", vec![script.display().to_string()]);
    disabled.enabled = false;

    let fleet = booted_fleet(&dir, &[disabled]).await;
    assert_eq!(fleet.server_count().await, 0);
    fleet.shutdown().await;
}
