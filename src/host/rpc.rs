// src/host/rpc.rs
// Inbound RPC surface: tools/list, tools/call, prompts/list|get over
// line-framed stdio or HTTP

use axum::Router;
use axum::extract::{Json, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use super::auth::{self, CallerContext};
use super::UnifiedToolHost;
use crate::error::{DriftError, ErrorKind, Result};
use crate::fleet::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Inbound methods (slash style, unlike the fleet's outbound dot style)
pub mod methods {
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
}

/// Route one request to the host and wrap the outcome in a response
pub async fn dispatch(
    host: &Arc<UnifiedToolHost>,
    caller: &CallerContext,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id;
    match handle(host, caller, &request).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => {
            let envelope = err.envelope();
            JsonRpcResponse::failure(
                id,
                error_code(err.kind),
                &envelope.message,
                Some(json!(envelope)),
            )
        }
    }
}

async fn handle(
    host: &Arc<UnifiedToolHost>,
    caller: &CallerContext,
    request: &JsonRpcRequest,
) -> Result<Value> {
    let params = request.params.clone().unwrap_or_else(|| json!({}));

    match request.method.as_str() {
        methods::TOOLS_LIST => {
            let tools = host.list_tools(caller).await;
            Ok(json!({"tools": tools}))
        }
        methods::TOOLS_CALL => {
            let name = params
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| DriftError::validation("tools/call requires a 'name'"))?;
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let result = host.call_tool(caller, name, arguments).await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::PROMPTS_LIST => {
            let prompts: Vec<Value> = host
                .list_prompts()
                .await
                .into_iter()
                .map(|(server, prompt)| {
                    json!({
                        "server": server,
                        "name": prompt.name,
                        "description": prompt.description,
                        "arguments": prompt.arguments,
                    })
                })
                .collect();
            Ok(json!({"prompts": prompts}))
        }
        methods::PROMPTS_GET => {
            let server = params
                .get("server")
                .and_then(|s| s.as_str())
                .ok_or_else(|| DriftError::validation("prompts/get requires a 'server'"))?;
            let name = params
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| DriftError::validation("prompts/get requires a 'name'"))?;
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            host.get_prompt(server, name, arguments).await
        }
        other => Err(DriftError::not_found(format!("unknown method '{other}'"))),
    }
}

fn error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Validation => -32602,
        ErrorKind::NotFound => -32601,
        ErrorKind::Internal | ErrorKind::Transport => -32603,
        // Domain errors land in the implementation-defined range
        ErrorKind::Unauthorized => -32001,
        ErrorKind::Forbidden => -32002,
        ErrorKind::RateLimited => -32003,
        ErrorKind::Timeout => -32004,
        ErrorKind::Network => -32005,
        ErrorKind::Remote => -32006,
    }
}

/// Serve line-framed JSON-RPC on stdin/stdout until EOF. Caller identity
/// comes from the environment and the current-session broadcast.
pub async fn serve_stdio(host: Arc<UnifiedToolHost>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    info!("[Host] Serving on stdio");
    let caller = CallerContext::default();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => {
                if request.id.is_none() {
                    // Notification: nothing to answer
                    debug!("[Host] Ignoring notification '{}'", request.method);
                    continue;
                }
                dispatch(&host, &caller, request).await
            }
            Err(err) => JsonRpcResponse::failure(None, -32700, &format!("parse error: {err}"), None),
        };

        let mut body = serde_json::to_string(&response)?;
        body.push('\n');
        stdout.write_all(body.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("[Host] Stdin closed, stopping");
    Ok(())
}

/// The HTTP surface: `POST /rpc` with the same method set, plus `/healthz`
pub fn router(host: Arc<UnifiedToolHost>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/healthz", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(host)
}

async fn handle_rpc(
    State(host): State<Arc<UnifiedToolHost>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let caller = match auth::caller_from_headers(&headers, &host.config().jwt_secret) {
        Ok(caller) => caller,
        Err(err) => {
            error!("[Host] Rejected request: {}", err);
            let envelope = err.envelope();
            return Json(JsonRpcResponse::failure(
                request.id,
                error_code(err.kind),
                &envelope.message,
                Some(json!(envelope)),
            ));
        }
    };

    Json(dispatch(&host, &caller, request).await)
}

async fn handle_health(State(host): State<Arc<UnifiedToolHost>>) -> Json<Value> {
    let fleet = host.fleet().status().await;
    Json(json!({
        "status": "ok",
        "registryTools": host.registry().count(),
        "fleet": fleet,
    }))
}

/// Serve the HTTP surface until the process is stopped
pub async fn serve_http(host: Arc<UnifiedToolHost>, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| DriftError::network(format!("cannot bind {addr}: {err}")))?;
    info!("[Host] Serving HTTP on {}", addr);
    axum::serve(listener, router(host))
        .await
        .map_err(|err| DriftError::network(format!("HTTP server failed: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::RateLimited,
            ErrorKind::Timeout,
            ErrorKind::Network,
            ErrorKind::Transport,
            ErrorKind::Remote,
            ErrorKind::Internal,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| error_code(*k)).collect();
        codes.sort();
        codes.dedup();
        // Transport and Internal intentionally share -32603
        assert_eq!(codes.len(), kinds.len() - 1);
    }
}
