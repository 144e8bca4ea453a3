//! Wire types shared by the proxy, the execution backends, and the
//! control surface.
//!
//! These are the "currency" of the broker: every backend produces an
//! [`ExecutionResult`], and every refusal travels as a
//! [`PermissionDenied`] record carrying enough structure for a client to
//! recover by granting the named capability.

use serde::{Deserialize, Serialize};

use crate::permission::Capability;

/// Marker code carried by every denial record, on the wire and in the
/// newline-delimited JSON the sandbox preamble writes to stderr.
pub const PERMISSION_DENIED_CODE: &str = "PERMISSION_DENIED";

/// What the sandboxed program tried to do, for denial reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptedAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub details: serde_json::Value,
}

/// Machine-readable permission denial.
///
/// Returned with HTTP 403 by the proxy, echoed to stderr by the
/// preamble, and parsed back out by the preamble executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDenied {
    pub code: String,
    pub required_permission: Capability,
    pub attempted_action: AttemptedAction,
    /// Fresh v4 UUID per denial.
    pub request_id: String,
}

impl PermissionDenied {
    /// Build a denial with a fresh request id.
    pub fn new(required: Capability, attempted: AttemptedAction) -> Self {
        Self {
            code: PERMISSION_DENIED_CODE.to_string(),
            required_permission: required,
            attempted_action: attempted,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Parse a stderr line as a denial record, if it is one.
    pub fn from_line(line: &str) -> Option<Self> {
        let parsed: Self = serde_json::from_str(line.trim()).ok()?;
        (parsed.code == PERMISSION_DENIED_CODE).then_some(parsed)
    }
}

/// Uniform execution result shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_required: Option<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Successful run with captured stdout.
    pub fn ok(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            permission_required: None,
            exit_code: Some(0),
        }
    }

    /// Failure that never reached (or never finished) the runtime.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            permission_required: None,
            exit_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::HttpMethod;

    fn denial() -> PermissionDenied {
        PermissionDenied::new(
            Capability::Http {
                host: "httpbin.org".to_string(),
                path_pattern: Some("/get".to_string()),
                methods: vec![HttpMethod::Get],
                description: "GET https://httpbin.org/get".to_string(),
            },
            AttemptedAction {
                kind: "http_request".to_string(),
                details: serde_json::json!({"url": "https://httpbin.org/get"}),
            },
        )
    }

    #[test]
    fn test_denial_request_ids_are_fresh_uuids() {
        let a = denial();
        let b = denial();
        assert_ne!(a.request_id, b.request_id);
        assert!(uuid::Uuid::parse_str(&a.request_id).is_ok());
    }

    #[test]
    fn test_denial_roundtrips_through_stderr_line() {
        let d = denial();
        let line = serde_json::to_string(&d).unwrap();
        let back = PermissionDenied::from_line(&line).expect("line parses as denial");
        assert_eq!(back.request_id, d.request_id);
        assert!(back.required_permission.same_grant(&d.required_permission));
    }

    #[test]
    fn test_from_line_rejects_non_denials() {
        assert!(PermissionDenied::from_line("plain stderr noise").is_none());
        assert!(PermissionDenied::from_line(r#"{"code":"OTHER"}"#).is_none());
    }

    #[test]
    fn test_execution_result_omits_empty_fields() {
        let result = ExecutionResult::ok("42\n".to_string());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "42\n");
        assert!(value.get("error").is_none());
        assert!(value.get("permissionRequired").is_none());
    }

    #[test]
    fn test_denial_wire_shape() {
        let value = serde_json::to_value(denial()).unwrap();
        assert_eq!(value["code"], "PERMISSION_DENIED");
        assert_eq!(value["requiredPermission"]["type"], "http");
        assert_eq!(value["attemptedAction"]["type"], "http_request");
        assert!(value["requestId"].is_string());
    }
}
