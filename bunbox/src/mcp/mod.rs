//! MCP (Model Context Protocol) control surface.
//!
//! JSON-RPC 2.0 over stdio. One request per line in, one response per
//! line out.
//!
//! Protocol flow:
//!   1. Client sends `initialize`; server returns capabilities
//!   2. Client sends `notifications/initialized`
//!   3. Client sends `tools/list`; server returns the 9 tool definitions
//!   4. Client sends `tools/call`; server runs the tool, returns result
//!
//! Every tool response is a JSON document. Permission denials inside an
//! execution come back as a structured result with `permissionRequired`
//! so the client can recover by calling `grant_permission`.

pub mod handlers;
pub mod state;
pub mod tools;

use anyhow::Result;
use serde_json::{json, Value};
use std::io::{self, BufRead, BufReader, Write};

use handlers::{
    handle_delete_snippet, handle_execute_code, handle_get_snippet, handle_get_snippet_types,
    handle_grant_permission, handle_list_permissions, handle_list_snippets,
    handle_revoke_permission, handle_save_snippet,
};
use state::McpServer;
use tools::get_mcp_tools;

/// Maximum JSON-RPC request size (10 MB) to prevent OOM DoS.
const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Read a single line from `reader`, enforcing [`MAX_REQUEST_SIZE`].
/// Returns `Ok(None)` on EOF. Oversized lines are discarded and an
/// error returned.
fn read_line_limited(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return if buf.is_empty() {
                Ok(None)
            } else {
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                String::from_utf8(buf)
                    .map(Some)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8"))
            };
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > MAX_REQUEST_SIZE {
                    reader.consume(pos + 1);
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Request exceeds 10MB size limit",
                    ));
                }
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                return String::from_utf8(buf)
                    .map(Some)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8"));
            }
            None => {
                let len = available.len();
                if buf.len() + len > MAX_REQUEST_SIZE {
                    reader.consume(len);
                    skip_until_newline(reader);
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Request exceeds 10MB size limit",
                    ));
                }
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

/// Discard bytes until a newline or EOF without buffering them.
fn skip_until_newline(reader: &mut impl BufRead) {
    loop {
        match reader.fill_buf() {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(bytes) => {
                if let Some(pos) = bytes.iter().position(|&b| b == b'\n') {
                    reader.consume(pos + 1);
                    break;
                }
                let len = bytes.len();
                reader.consume(len);
            }
            Err(_) => break,
        }
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {}},
        "serverInfo": {
            "name": "bunbox",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Dispatch one tools/call to its handler.
fn dispatch_tool(server: &McpServer, name: &str, arguments: &Value) -> Result<Value> {
    match name {
        "execute_code" => handle_execute_code(server, arguments),
        "grant_permission" => handle_grant_permission(server, arguments),
        "list_permissions" => handle_list_permissions(server),
        "revoke_permission" => handle_revoke_permission(server, arguments),
        "save_snippet" => handle_save_snippet(server, arguments),
        "list_snippets" => handle_list_snippets(server),
        "get_snippet" => handle_get_snippet(server, arguments),
        "get_snippet_types" => handle_get_snippet_types(server, arguments),
        "delete_snippet" => handle_delete_snippet(server, arguments),
        _ => anyhow::bail!("Unknown tool: {}", name),
    }
}

/// Run the control surface over stdio until EOF.
pub fn serve_mcp_stdio(server: &McpServer) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());

    loop {
        let line = match read_line_limited(&mut reader) {
            Ok(None) => break, // EOF
            Ok(Some(line)) => line,
            Err(e) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32600, "message": format!("Request size error: {}", e)}
                });
                writeln!(stdout, "{}", response)?;
                stdout.flush()?;
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32700, "message": format!("Parse error: {}", e)}
                });
                writeln!(stdout, "{}", response)?;
                stdout.flush()?;
                continue;
            }
        };

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(json!({}));

        match method {
            "initialize" => {
                send_response(&mut stdout, id, Ok(handle_initialize()))?;
            }
            "notifications/initialized" | "initialized" => {
                // notification, no response
            }
            "ping" => {
                send_response(&mut stdout, id, Ok(json!({})))?;
            }
            "tools/list" => {
                send_response(&mut stdout, id, Ok(json!({"tools": get_mcp_tools()})))?;
            }
            "tools/call" => {
                let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                match dispatch_tool(server, tool, &arguments) {
                    Ok(result) => {
                        let content = json!({
                            "content": [{"type": "text", "text": result.to_string()}],
                            "isError": false
                        });
                        send_response(&mut stdout, id, Ok(content))?;
                    }
                    Err(e) => {
                        let content = json!({
                            "content": [{"type": "text", "text": format!("Error: {}", e)}],
                            "isError": true
                        });
                        send_response(&mut stdout, id, Ok(content))?;
                    }
                }
            }
            "resources/list" => {
                send_response(&mut stdout, id, Ok(json!({"resources": []})))?;
            }
            "prompts/list" => {
                send_response(&mut stdout, id, Ok(json!({"prompts": []})))?;
            }
            _ => {
                if id.is_some() {
                    let error = json!({
                        "code": -32601,
                        "message": format!("Method not found: {}", method)
                    });
                    send_response(&mut stdout, id, Err(error))?;
                }
                // notifications without an id are ignored
            }
        }
    }

    Ok(())
}

/// Send one JSON-RPC 2.0 response line.
fn send_response(
    stdout: &mut io::Stdout,
    id: Option<Value>,
    result: Result<Value, Value>,
) -> Result<()> {
    let id = id.unwrap_or(Value::Null);
    let response = match result {
        Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    };
    writeln!(stdout, "{}", response)?;
    stdout.flush()?;
    Ok(())
}
