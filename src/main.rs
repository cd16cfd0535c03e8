//! GDB Dispatch Server
//!
//! Serves the GDB dispatch layer as MCP tools over stdio (JSON-RPC 2.0, one
//! message per line). Logs go to stderr; set `RUST_LOG` to adjust.
//!
//! Usage:
//!   Add to an MCP client config:
//!   ```json
//!   {
//!     "mcpServers": {
//!       "gdb": {
//!         "command": "/path/to/gdb-dispatch",
//!         "env": { "GDB_DISPATCH_TIMEOUT_MS": "10000" }
//!       }
//!     }
//!   }
//!   ```

use anyhow::Result;
use gdb_dispatch::gdb::GdbConfig;
use gdb_dispatch::mcp::protocol::*;
use gdb_dispatch::mcp::GdbMcpServer;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// MCP Server state
struct ServerState {
    server: GdbMcpServer,
    initialized: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = GdbConfig::from_env();
    debug!("Configuration: {:?}", config);

    let state = RwLock::new(ServerState {
        server: GdbMcpServer::new(config),
        initialized: false,
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Server ready, listening on stdin");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Error reading from stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                send(&mut stdout, &error_response(None, JsonRpcError::parse_error())).await?;
                continue;
            }
        };

        let id = request.id.clone();
        match handle_request(&state, request).await {
            Ok(Some(resp)) => send(&mut stdout, &resp).await?,
            Ok(None) => {
                // Notification, no response needed
            }
            Err(e) => {
                error!("Error handling request: {}", e);
                send(&mut stdout, &error_response(id, JsonRpcError::internal_error(&e.to_string()))).await?;
            }
        }
    }

    info!("Server shutting down");
    Ok(())
}

fn error_response(id: Option<RequestId>, error: JsonRpcError) -> JsonRpcErrorResponse {
    JsonRpcErrorResponse {
        jsonrpc: "2.0".to_string(),
        id,
        error,
    }
}

async fn send<T: Serialize>(stdout: &mut Stdout, message: &T) -> Result<()> {
    let text = serde_json::to_string(message)?;
    debug!("Sending: {}", text);
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn ok(id: Option<RequestId>, result: serde_json::Value) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: id.unwrap_or(RequestId::String("0".to_string())),
        result,
    })?)
}

/// Handle a JSON-RPC request
async fn handle_request(
    state: &RwLock<ServerState>,
    request: JsonRpcRequest,
) -> Result<Option<serde_json::Value>> {
    let method = request.method.as_str();

    debug!("Handling method: {}", method);

    match method {
        // MCP Protocol methods
        "initialize" => {
            let mut state = state.write().await;
            state.initialized = true;
            let result = state.server.handle_initialize(request.params).await?;
            Ok(Some(ok(request.id, result)?))
        }
        "initialized" | "notifications/initialized" => Ok(None),
        "ping" => Ok(Some(ok(request.id, serde_json::json!({}))?)),
        "tools/list" => {
            let state = state.read().await;
            let result = state.server.handle_tools_list().await?;
            Ok(Some(ok(request.id, result)?))
        }
        "tools/call" => {
            let state = state.read().await;
            if !state.initialized {
                warn!("tools/call before initialize");
            }
            let result = state.server.handle_tools_call(request.params).await?;
            Ok(Some(ok(request.id, result)?))
        }
        "resources/list" => Ok(Some(ok(request.id, serde_json::json!({"resources": []}))?)),
        "prompts/list" => Ok(Some(ok(request.id, serde_json::json!({"prompts": []}))?)),
        "logging/setLevel" => {
            // Acknowledge but ignore
            Ok(Some(ok(request.id, serde_json::json!({}))?))
        }
        _ if request.id.is_none() => {
            debug!("Ignoring notification: {}", method);
            Ok(None)
        }
        _ => {
            warn!("Unknown method: {}", method);
            Ok(Some(serde_json::to_value(error_response(
                request.id.clone(),
                JsonRpcError::method_not_found(method),
            ))?))
        }
    }
}
