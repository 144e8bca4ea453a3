//! Language-service driver: a persistent tsserver child spoken to over
//! its length-prefixed JSON protocol.
//!
//! One instance exists per session container; it is spawned as a
//! `docker exec -i` child and torn down with the container. Requests
//! are single JSON lines with monotonically increasing sequence
//! numbers; responses arrive framed as `Content-Length: N\r\n\r\n<body>`
//! and are matched back to their waiters by `request_seq`. Events are
//! received and discarded.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Per-request timeout. A slot whose response does not arrive in time
/// is abandoned; a late response is silently dropped by the reader.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// tsserver needs a moment after spawn before it accepts requests.
const WARMUP: Duration = Duration::from_millis(500);

const HEADER_PREFIX: &[u8] = b"Content-Length:";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Exported function signature reported via quick info.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedFunction {
    pub name: String,
    pub signature: String,
    pub documentation: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, mpsc::Sender<Value>>>>;

/// Driver over one tsserver child process.
pub struct TsServer {
    child: Child,
    stdin: Mutex<std::process::ChildStdin>,
    pending: PendingMap,
    seq: AtomicU64,
    reader: Option<thread::JoinHandle<()>>,
}

impl TsServer {
    /// Take ownership of a spawned tsserver child and start the reader.
    /// Blocks through the warm-up delay so callers can request
    /// immediately afterwards.
    pub fn start(mut child: Child) -> Result<Self> {
        let stdin = child.stdin.take().context("tsserver child has no stdin")?;
        let stdout = child.stdout.take().context("tsserver child has no stdout")?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader = thread::spawn(move || read_loop(stdout, reader_pending));
        thread::sleep(WARMUP);
        tracing::debug!("tsserver started");
        Ok(Self {
            child,
            stdin: Mutex::new(stdin),
            pending,
            seq: AtomicU64::new(1),
            reader: Some(reader),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn write_message(&self, message: &Value) -> Result<()> {
        let mut stdin = self.stdin.lock().expect("tsserver stdin lock");
        writeln!(stdin, "{}", message).context("failed to write to tsserver")?;
        stdin.flush().context("failed to flush tsserver stdin")?;
        Ok(())
    }

    /// Send a command that produces no response (open, close, exit).
    fn send_command(&self, command: &str, arguments: Value) -> Result<()> {
        let message = json!({
            "seq": self.next_seq(),
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.write_message(&message)
    }

    /// Send a request and wait up to [`REQUEST_TIMEOUT`] for its response.
    fn request(&self, command: &str, arguments: Value) -> Result<Value> {
        let seq = self.next_seq();
        let (tx, rx) = mpsc::channel();
        self.pending
            .lock()
            .expect("tsserver pending lock")
            .insert(seq, tx);

        let message = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        if let Err(e) = self.write_message(&message) {
            self.pending
                .lock()
                .expect("tsserver pending lock")
                .remove(&seq);
            return Err(e);
        }

        match rx.recv_timeout(REQUEST_TIMEOUT) {
            Ok(response) => {
                let ok = response
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if !ok {
                    bail!(
                        "tsserver '{}' failed: {}",
                        command,
                        response
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                    );
                }
                Ok(response)
            }
            Err(_) => {
                // abandon the slot; a late response is dropped
                self.pending
                    .lock()
                    .expect("tsserver pending lock")
                    .remove(&seq);
                bail!("tsserver request '{}' timed out after 10s", command)
            }
        }
    }

    /// Semantic diagnostics for `path`, one formatted line each.
    /// An empty list means the file type-checks.
    pub fn get_diagnostics(&self, path: &str) -> Result<Vec<String>> {
        self.send_command("open", json!({"file": path}))?;
        let result = self.request(
            "semanticDiagnosticsSync",
            json!({"file": path, "includeLinePosition": true}),
        );
        let _ = self.send_command("close", json!({"file": path}));
        let response = result?;
        let diagnostics = response
            .get("body")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(diagnostics
            .iter()
            .map(|diagnostic| format_diagnostic(path, diagnostic))
            .collect())
    }

    /// Quick info at a position (1-based line and offset).
    pub fn get_quick_info(&self, path: &str, line: u64, offset: u64) -> Result<Value> {
        self.send_command("open", json!({"file": path}))?;
        let result = self.request(
            "quickinfo",
            json!({"file": path, "line": line, "offset": offset}),
        );
        let _ = self.send_command("close", json!({"file": path}));
        Ok(result?.get("body").cloned().unwrap_or(Value::Null))
    }

    /// Name, signature, and documentation of every exported function in
    /// `path`, from the navigation tree plus quick info at each item.
    pub fn get_exported_function_types(&self, path: &str) -> Result<Vec<ExportedFunction>> {
        self.send_command("open", json!({"file": path}))?;
        let collected = (|| {
            let tree = self.request("navtree", json!({"file": path}))?;
            let mut found = Vec::new();
            if let Some(body) = tree.get("body") {
                self.walk_navtree(path, body, &mut found)?;
            }
            Ok(found)
        })();
        let _ = self.send_command("close", json!({"file": path}));
        collected
    }

    fn walk_navtree(
        &self,
        path: &str,
        item: &Value,
        found: &mut Vec<ExportedFunction>,
    ) -> Result<()> {
        let kind = item.get("kind").and_then(Value::as_str).unwrap_or("");
        let modifiers = item
            .get("kindModifiers")
            .and_then(Value::as_str)
            .unwrap_or("");
        if kind == "function" && modifiers.contains("export") {
            let start = item
                .get("spans")
                .and_then(Value::as_array)
                .and_then(|spans| spans.first())
                .and_then(|span| span.get("start"));
            let line = start.and_then(|s| s.get("line")).and_then(Value::as_u64);
            let offset = start.and_then(|s| s.get("offset")).and_then(Value::as_u64);
            if let (Some(line), Some(offset)) = (line, offset) {
                let info = self.request(
                    "quickinfo",
                    json!({"file": path, "line": line, "offset": offset}),
                )?;
                let body = info.get("body").cloned().unwrap_or(Value::Null);
                found.push(ExportedFunction {
                    name: item
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    signature: body
                        .get("displayString")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    documentation: body
                        .get("documentation")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
        if let Some(children) = item.get("childItems").and_then(Value::as_array) {
            for child in children {
                self.walk_navtree(path, child, found)?;
            }
        }
        Ok(())
    }

    /// Stop the server: ask it to exit, then make sure it is gone, then
    /// drop every pending slot.
    pub fn stop(&mut self) {
        let _ = self.send_command("exit", json!({}));
        thread::sleep(Duration::from_millis(200));
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        tracing::debug!("tsserver stopped");
    }
}

/// Format one diagnostic as `path(line,col): category TS<code>: message`.
fn format_diagnostic(path: &str, diagnostic: &Value) -> String {
    let location = diagnostic
        .get("startLocation")
        .or_else(|| diagnostic.get("start"));
    let line = location
        .and_then(|l| l.get("line"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let offset = location
        .and_then(|l| l.get("offset"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let category = diagnostic
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("error");
    let code = diagnostic.get("code").and_then(Value::as_u64).unwrap_or(0);
    let message = diagnostic
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("");
    format!(
        "{}({},{}): {} TS{}: {}",
        path, line, offset, category, code, message
    )
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scan the buffer for one complete framed message, consuming it.
/// Returns `None` when no complete frame is buffered yet.
fn extract_message(buffer: &mut Vec<u8>) -> Option<Value> {
    loop {
        let header_at = find_subslice(buffer, HEADER_PREFIX)?;
        let length_at = header_at + HEADER_PREFIX.len();
        let terminator_at = find_subslice(&buffer[length_at..], HEADER_TERMINATOR)
            .map(|offset| length_at + offset)?;
        let length: usize = match std::str::from_utf8(&buffer[length_at..terminator_at])
            .ok()
            .and_then(|text| text.trim().parse().ok())
        {
            Some(length) => length,
            None => {
                // corrupt header: skip past it and rescan
                buffer.drain(..terminator_at + HEADER_TERMINATOR.len());
                continue;
            }
        };
        let body_at = terminator_at + HEADER_TERMINATOR.len();
        if buffer.len() < body_at + length {
            return None;
        }
        let body: Vec<u8> = buffer[body_at..body_at + length].to_vec();
        buffer.drain(..body_at + length);
        match serde_json::from_slice(&body) {
            Ok(message) => return Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable tsserver frame");
                continue;
            }
        }
    }
}

fn read_loop(mut stdout: std::process::ChildStdout, pending: PendingMap) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(message) = extract_message(&mut buffer) {
                    dispatch(&pending, message);
                }
            }
            Err(_) => break,
        }
    }
}

/// Route a decoded message: responses resolve their pending slot,
/// everything else (events) is discarded.
fn dispatch(pending: &PendingMap, message: Value) {
    if message.get("type").and_then(Value::as_str) != Some("response") {
        return;
    }
    let Some(request_seq) = message.get("request_seq").and_then(Value::as_u64) else {
        return;
    };
    let slot = pending
        .lock()
        .ok()
        .and_then(|mut slots| slots.remove(&request_seq));
    if let Some(tx) = slot {
        // an abandoned slot has no receiver; the send failing is the
        // "silently dropped" contract for late responses
        let _ = tx.send(message);
    }
}
