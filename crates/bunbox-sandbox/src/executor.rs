//! Preamble execution backend: runs user code under the host Bun
//! runtime with the sandbox preamble preloaded.

use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use bunbox_core::observability;
use bunbox_core::protocol::{ExecutionResult, PermissionDenied};

use crate::common::wait_with_timeout;
use crate::preamble;

/// Source file name inside the per-run temp directory.
const SOURCE_FILE: &str = "main.ts";

/// Budget for the proxy health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Executor for the preamble backend. One per broker; stateless apart
/// from the proxy location.
pub struct PreambleExecutor {
    proxy_url: String,
}

impl PreambleExecutor {
    pub fn new(proxy_url: String) -> Self {
        Self { proxy_url }
    }

    /// Execute processed source text. Always returns a uniform result
    /// record; infrastructure failures become error results, never
    /// panics or propagated errors.
    pub fn execute(
        &self,
        source: &str,
        timeout_secs: u64,
        allowed_env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        if !self.proxy_healthy() {
            return ExecutionResult::fail(
                "permission proxy is not reachable; refusing to execute",
            );
        }

        let bun = match which::which("bun") {
            Ok(path) => path,
            Err(_) => return ExecutionResult::fail("bun runtime not found in PATH"),
        };

        // TempDir cleans the preamble and source up on every path.
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionResult::fail(format!("failed to create temp dir: {}", e)),
        };
        let preamble_path = match preamble::write_preamble(dir.path()) {
            Ok(path) => path,
            Err(e) => return ExecutionResult::fail(format!("failed to write preamble: {}", e)),
        };
        let source_path = dir.path().join(SOURCE_FILE);
        if let Err(e) = std::fs::write(&source_path, source) {
            return ExecutionResult::fail(format!("failed to write source: {}", e));
        }

        let hash = observability::code_hash(source);
        observability::audit_execution_started("preamble", &hash, timeout_secs);
        tracing::info!(code_hash = %hash, timeout_secs, "Executing via preamble backend");

        let mut command = Command::new(bun);
        command
            .arg("run")
            .arg("--preload")
            .arg(&preamble_path)
            .arg(&source_path)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear();
        // the child keeps only what the sandbox contract names
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        for (key, value) in preamble::sandbox_env(&self.proxy_url, allowed_env) {
            command.env(key, value);
        }

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::fail(format!("failed to spawn bun: {}", e)),
        };
        let output = match wait_with_timeout(&mut child, timeout_secs) {
            Ok(output) => output,
            Err(e) => return ExecutionResult::fail(e.to_string()),
        };
        observability::audit_execution_completed(
            "preamble",
            &hash,
            output.exit_code,
            start.elapsed().as_millis() as u64,
            output.stdout.len(),
        );

        // first denial marker on stderr wins
        let denial = output.stderr.lines().find_map(PermissionDenied::from_line);

        if output.timed_out {
            return ExecutionResult {
                success: false,
                output: non_empty(output.stdout),
                error: Some(format!(
                    "Execution timed out after {} seconds",
                    timeout_secs
                )),
                permission_required: denial.map(|d| d.required_permission),
                exit_code: Some(output.exit_code),
            };
        }
        if output.exit_code == 0 {
            return ExecutionResult::ok(output.stdout);
        }
        ExecutionResult {
            success: false,
            output: non_empty(output.stdout),
            error: Some(output.stderr),
            permission_required: denial.map(|d| d.required_permission),
            exit_code: Some(output.exit_code),
        }
    }

    fn proxy_healthy(&self) -> bool {
        let url = format!("{}/health", self.proxy_url);
        ureq::get(&url)
            .timeout(HEALTH_TIMEOUT)
            .call()
            .map(|response| response.status() == 200)
            .unwrap_or(false)
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunbox_core::permission::PermissionStore;

    #[test]
    fn test_unreachable_proxy_refuses_to_execute() {
        // nothing listens on the discard port
        let executor = PreambleExecutor::new("http://127.0.0.1:9".to_string());
        let result = executor.execute("console.log(1)", 5, &BTreeMap::new());
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("permission proxy is not reachable"));
        assert!(result.exit_code.is_none());
    }

    #[test]
    fn test_healthy_proxy_is_detected() {
        let handle = crate::proxy::start(PermissionStore::new(), 0).expect("proxy starts");
        let executor = PreambleExecutor::new(handle.url());
        assert!(executor.proxy_healthy());
        handle.shutdown();
    }

    #[test]
    fn test_denial_marker_extraction_from_stderr() {
        use bunbox_core::permission::{Capability, HttpMethod};
        use bunbox_core::protocol::AttemptedAction;

        let denial = PermissionDenied::new(
            Capability::Http {
                host: "httpbin.org".to_string(),
                path_pattern: Some("/get".to_string()),
                methods: vec![HttpMethod::Get],
                description: "GET https://httpbin.org/get".to_string(),
            },
            AttemptedAction {
                kind: "http_request".to_string(),
                details: serde_json::json!({}),
            },
        );
        let stderr = format!(
            "warning: something\n{}\nerror: uncaught PERMISSION_DENIED\n",
            serde_json::to_string(&denial).unwrap()
        );
        let found = stderr.lines().find_map(PermissionDenied::from_line);
        assert!(found.is_some());
        assert!(found
            .unwrap()
            .required_permission
            .same_grant(&denial.required_permission));
    }
}
