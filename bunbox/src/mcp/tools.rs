//! MCP tool definitions exposed by `tools/list`.

use serde_json::{json, Value};

/// The nine control-surface tools.
pub fn get_mcp_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "execute_code",
            "description": "Execute TypeScript/JavaScript in the bunbox sandbox. Network access goes through the permission proxy; undeclared hosts are denied with a grantable capability record. Snippets referenced via '// @use-snippet: <name>' are inlined first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Source text to execute"
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Timeout in seconds (default 30)"
                    }
                },
                "required": ["code"]
            }
        }),
        json!({
            "name": "grant_permission",
            "description": "Grant a capability. Pass the capability record from a PERMISSION_DENIED result (type http/file/env plus a description).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["http", "file", "env"]},
                    "host": {"type": "string"},
                    "pathPattern": {"type": "string"},
                    "methods": {"type": "array", "items": {"type": "string"}},
                    "path": {"type": "string"},
                    "operations": {"type": "array", "items": {"type": "string"}},
                    "variables": {"type": "array", "items": {"type": "string"}},
                    "description": {"type": "string"}
                },
                "required": ["type", "description"]
            }
        }),
        json!({
            "name": "list_permissions",
            "description": "List every granted capability.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "revoke_permission",
            "description": "Revoke a capability. Removes every grant structurally equal to the given record.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["http", "file", "env"]},
                    "description": {"type": "string"}
                },
                "required": ["type", "description"]
            }
        }),
        json!({
            "name": "save_snippet",
            "description": "Save a reusable snippet. The code must contain a JSDoc block with an @description tag.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Snippet name ([A-Za-z0-9_-]+)"},
                    "code": {"type": "string", "description": "Snippet source"}
                },
                "required": ["name", "code"]
            }
        }),
        json!({
            "name": "list_snippets",
            "description": "List stored snippets with their descriptions.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "get_snippet",
            "description": "Fetch one snippet's code and description.",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
        json!({
            "name": "get_snippet_types",
            "description": "Exported function signatures of a snippet, via the container's language service. Requires an active container session.",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
        json!({
            "name": "delete_snippet",
            "description": "Delete a stored snippet.",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_are_unique_and_complete() {
        let tools = get_mcp_tools();
        let names: Vec<&str> = tools
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 9);
        for expected in [
            "execute_code",
            "grant_permission",
            "list_permissions",
            "revoke_permission",
            "save_snippet",
            "list_snippets",
            "get_snippet",
            "get_snippet_types",
            "delete_snippet",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[test]
    fn test_every_tool_has_an_input_schema() {
        for tool in get_mcp_tools() {
            assert_eq!(tool["inputSchema"]["type"], "object", "tool {}", tool["name"]);
        }
    }
}
