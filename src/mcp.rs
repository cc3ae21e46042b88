//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! Reads JSON-RPC 2.0 requests from a line-oriented input (stdin in
//! production) and writes one response line per request.
//!
//! ## Supported methods
//!
//! | Method       | Description                      |
//! |--------------|----------------------------------|
//! | `initialize` | Handshake, returns capabilities  |
//! | `tools/list` | List available tool definitions  |
//! | `tools/call` | Execute a tool and return result |
//! | `ping`       | Liveness check                   |
//!
//! Notifications (requests without an `id`) are acknowledged silently.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::tools;

const SERVER_NAME: &str = "bizdata-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Run the MCP server on stdio until EOF.
pub async fn run_stdio(ctx: &AppContext) {
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    serve(ctx, reader, &mut stdout).await;
}

/// Process requests from `reader` until EOF or a read error.
pub async fn serve<R, W>(ctx: &AppContext, mut reader: R, writer: &mut W)
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("input closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "input read error");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": -32700,
                        "message": format!("Parse error: {}", e)
                    }
                });
                write_response(writer, &response).await;
                continue;
            }
        };

        if let Some(response) = handle_request(ctx, &request).await {
            write_response(writer, &response).await;
        }
    }
}

/// Response for one request, or `None` for a notification.
async fn handle_request(ctx: &AppContext, request: &Value) -> Option<Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    if id.is_none() {
        debug!(method, "notification ignored");
        return None;
    }

    let response = match method {
        "initialize" => handle_initialize(),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "result": { "tools": tools::all_tool_definitions() }
        }),
        "tools/call" => handle_tools_call(ctx, request).await,
        "ping" => json!({ "jsonrpc": "2.0", "result": {} }),
        _ => json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32601,
                "message": format!("Method not found: {}", method)
            }
        }),
    };
    Some(inject_id(response, id))
}

/// Handle `initialize`: protocol version, capabilities, and server info.
fn handle_initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        }
    })
}

/// Handle `tools/call`: dispatch to the matching tool handler.
async fn handle_tools_call(ctx: &AppContext, request: &Value) -> Value {
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    debug!(tool = name, "tool call");
    let result = tools::handle_tool_call(name, &args, ctx).await;

    let mut response_result = json!({
        "content": result.content
    });
    if result.is_error {
        response_result["isError"] = json!(true);
    }

    json!({
        "jsonrpc": "2.0",
        "result": response_result
    })
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Option<Value>) -> Value {
    if let Some(id) = id {
        response["id"] = id;
    }
    response
}

/// Write one JSON-RPC message as a single line, flushed immediately.
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = writer.write_all(output.as_bytes()).await {
        warn!(error = %e, "output write error");
    }
    if let Err(e) = writer.flush().await {
        warn!(error = %e, "output flush error");
    }
}
