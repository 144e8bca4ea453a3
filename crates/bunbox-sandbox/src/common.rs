//! Shared subprocess plumbing for the execution backends.

use anyhow::Result;
use std::io::Read;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

/// How often the wait loop polls the child.
const POLL_INTERVAL_MS: u64 = 50;

/// Raw output of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Wait for `child` under a timeout, draining stdout/stderr on reader
/// threads while it runs.
///
/// IMPORTANT: the streams must be drained concurrently. A child writing
/// more than the pipe buffer (~64KB) would otherwise block on write and
/// the wait would deadlock.
pub fn wait_with_timeout(child: &mut Child, timeout_secs: u64) -> Result<ProcessOutput> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    let stdout_handle = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let join_streams = |stdout_handle: Option<thread::JoinHandle<String>>,
                        stderr_handle: Option<thread::JoinHandle<String>>| {
        let stdout = stdout_handle
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_handle
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();
        (stdout, stderr)
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let (stdout, stderr) = join_streams(stdout_handle, stderr_handle);
                return Ok(ProcessOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    timed_out: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = join_streams(stdout_handle, stderr_handle);
                return Err(anyhow::anyhow!("failed to wait for process: {}", e));
            }
        }

        if start.elapsed() > timeout {
            let _ = child.kill();
            let status = child.wait().ok();
            let (stdout, stderr) = join_streams(stdout_handle, stderr_handle);
            return Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
                timed_out: true,
            });
        }

        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .expect("test child spawns")
    }

    #[test]
    fn test_collects_both_streams_and_exit_code() {
        let mut child = sh("echo out; echo err >&2; exit 3");
        let out = wait_with_timeout(&mut child, 5).unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);
        assert!(!out.timed_out);
    }

    #[test]
    fn test_timeout_kills_the_child() {
        let mut child = sh("sleep 30");
        let start = Instant::now();
        let out = wait_with_timeout(&mut child, 1).unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        // well past the ~64KB pipe buffer
        let mut child = sh("head -c 300000 /dev/zero | tr '\\0' 'x'");
        let out = wait_with_timeout(&mut child, 10).unwrap();
        assert_eq!(out.stdout.len(), 300000);
        assert_eq!(out.exit_code, 0);
    }
}
