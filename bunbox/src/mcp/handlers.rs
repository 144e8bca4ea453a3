//! tools/call handlers.
//!
//! Each handler returns the operation's JSON document. Validation
//! failures come back as `{"error": ...}` and mutate nothing; only
//! infrastructure surprises surface as `Err` (the server loop wraps
//! those as isError content).

use anyhow::{Context, Result};
use serde_json::{json, Value};

use bunbox_core::config::BackendKind;
use bunbox_core::permission::Capability;
use bunbox_core::snippet::{inline_snippets, Snippet};

use super::state::McpServer;

/// Inline snippets, then dispatch to the configured backend.
pub fn handle_execute_code(server: &McpServer, args: &Value) -> Result<Value> {
    let Some(code) = args.get("code").and_then(Value::as_str) else {
        return Ok(json!({"error": "'code' argument is required"}));
    };
    let timeout = args
        .get("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(server.exec_config.timeout_secs);

    // composition happens before any runtime is spawned
    let composed = match inline_snippets(&server.snippets, code) {
        Ok(composed) => composed,
        Err(e) => return Ok(json!({"success": false, "error": e.to_string()})),
    };

    let result = match server.exec_config.backend {
        BackendKind::Preamble => {
            server
                .executor
                .execute(&composed, timeout, &server.env.snapshot())
        }
        BackendKind::Container => server.container.execute(&composed, timeout),
    };
    serde_json::to_value(&result).context("failed to serialise execution result")
}

pub fn handle_grant_permission(server: &McpServer, args: &Value) -> Result<Value> {
    let capability: Capability = match serde_json::from_value(args.clone()) {
        Ok(capability) => capability,
        Err(e) => return Ok(json!({"error": format!("Invalid capability: {}", e)})),
    };
    tracing::info!(kind = %capability.kind(), "Permission granted via control surface");
    server.permissions.grant(capability);
    Ok(json!({"success": true}))
}

pub fn handle_list_permissions(server: &McpServer) -> Result<Value> {
    let permissions = serde_json::to_value(server.permissions.list())
        .context("failed to serialise permissions")?;
    Ok(json!({"permissions": permissions}))
}

pub fn handle_revoke_permission(server: &McpServer, args: &Value) -> Result<Value> {
    let capability: Capability = match serde_json::from_value(args.clone()) {
        Ok(capability) => capability,
        Err(e) => return Ok(json!({"error": format!("Invalid capability: {}", e)})),
    };
    let removed = server.permissions.revoke(&capability);
    Ok(json!({"removed": removed}))
}

pub fn handle_save_snippet(server: &McpServer, args: &Value) -> Result<Value> {
    let (Some(name), Some(code)) = (
        args.get("name").and_then(Value::as_str),
        args.get("code").and_then(Value::as_str),
    ) else {
        return Ok(json!({"error": "'name' and 'code' arguments are required"}));
    };
    match server.snippets.save(name, code) {
        Ok(Snippet {
            name, description, ..
        }) => Ok(json!({"success": true, "name": name, "description": description})),
        Err(e) => Ok(json!({"error": e.to_string()})),
    }
}

pub fn handle_list_snippets(server: &McpServer) -> Result<Value> {
    let snippets = server.snippets.list()?;
    Ok(json!({
        "snippets": serde_json::to_value(snippets).context("failed to serialise snippets")?
    }))
}

pub fn handle_get_snippet(server: &McpServer, args: &Value) -> Result<Value> {
    let Some(name) = args.get("name").and_then(Value::as_str) else {
        return Ok(json!({"error": "'name' argument is required"}));
    };
    match server.snippets.get(name) {
        Ok(Some(snippet)) => Ok(json!({
            "name": snippet.name,
            "description": snippet.description,
            "code": snippet.code,
        })),
        Ok(None) => Ok(json!({"error": format!("Snippet '{}' not found", name)})),
        Err(e) => Ok(json!({"error": e.to_string()})),
    }
}

pub fn handle_get_snippet_types(server: &McpServer, args: &Value) -> Result<Value> {
    let Some(name) = args.get("name").and_then(Value::as_str) else {
        return Ok(json!({"error": "'name' argument is required"}));
    };
    if !server.container.is_active() {
        return Ok(json!({
            "error": "No active session container. Execute code with the container backend first, then query snippet types."
        }));
    }
    let snippet = match server.snippets.get(name) {
        Ok(Some(snippet)) => snippet,
        Ok(None) => return Ok(json!({"error": format!("Snippet '{}' not found", name)})),
        Err(e) => return Ok(json!({"error": e.to_string()})),
    };
    match server.container.exported_function_types(&snippet.code) {
        Ok(functions) => Ok(json!({
            "name": name,
            "functions": serde_json::to_value(functions)
                .context("failed to serialise function types")?
        })),
        Err(e) => Ok(json!({"error": e.to_string()})),
    }
}

pub fn handle_delete_snippet(server: &McpServer, args: &Value) -> Result<Value> {
    let Some(name) = args.get("name").and_then(Value::as_str) else {
        return Ok(json!({"error": "'name' argument is required"}));
    };
    match server.snippets.delete(name) {
        Ok(deleted) => Ok(json!({"deleted": deleted})),
        Err(e) => Ok(json!({"error": e.to_string()})),
    }
}
