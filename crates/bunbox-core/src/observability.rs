//! Observability: tracing init, audit log, security events.
//!
//! Audit records go to the JSONL file named by BUNBOX_AUDIT_LOG;
//! security events additionally emit a tracing warning. Both are
//! best-effort: a missing or unwritable path never fails an operation.

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::env_keys;

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup.
/// When BUNBOX_QUIET is set, only WARN and above are logged.
pub fn init_tracing() {
    let level = if crate::config::env_bool(env_keys::log::QUIET, false) {
        "bunbox=warn".to_string()
    } else {
        env::var(env_keys::log::LEVEL).unwrap_or_else(|_| "bunbox=info".to_string())
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json_output = crate::config::env_bool(env_keys::log::JSON, false);

    let _ = if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref path) = *guard {
            return Some(path.clone());
        }
    }
    let path = env::var(env_keys::log::AUDIT).ok()?;
    if path.is_empty() {
        return None;
    }
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(file, "{}", line);
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Short content hash used to correlate audit records for one program.
pub fn code_hash(code: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Audit: execution_started (right before the runtime is spawned).
pub fn audit_execution_started(backend: &str, code_hash: &str, timeout_secs: u64) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "execution_started",
            "backend": backend,
            "code_hash": code_hash,
            "timeout_secs": timeout_secs,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: execution_completed.
pub fn audit_execution_completed(
    backend: &str,
    code_hash: &str,
    exit_code: i32,
    duration_ms: u64,
    output_len: usize,
) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "execution_completed",
            "backend": backend,
            "code_hash": code_hash,
            "exit_code": exit_code,
            "duration_ms": duration_ms,
            "output_len": output_len,
            "success": exit_code == 0,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: a required capability was not covered by any grant.
pub fn security_permission_denied(kind: &str, target: &str, request_id: &str) {
    tracing::warn!(
        kind = %kind,
        target = %target,
        request_id = %request_id,
        "Security: permission denied"
    );
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "permission_denied",
            "kind": kind,
            "target": target,
            "request_id": request_id,
        });
        append_jsonl(&path, &record);
    }
}

/// Security event: container session replaced after a dead-instance check.
pub fn security_container_recreated(container: &str, reason: &str) {
    tracing::warn!(
        container = %container,
        reason = %reason,
        "Security: session container recreated"
    );
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "container_recreated",
            "container": container,
            "reason": reason,
        });
        append_jsonl(&path, &record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_hash_is_stable_and_short() {
        let a = code_hash("console.log(1)");
        let b = code_hash("console.log(1)");
        let c = code_hash("console.log(2)");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
