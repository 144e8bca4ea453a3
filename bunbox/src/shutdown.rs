//! Process shutdown: exactly-once teardown of the session container.
//!
//! Signal handling and the normal exit path can both reach teardown;
//! the swap guard makes the second entry a no-op.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bunbox_sandbox::container::ContainerBackend;

static TEARDOWN_DONE: AtomicBool = AtomicBool::new(false);

/// Tear the container session down at most once per process.
pub fn teardown_once(container: &ContainerBackend) {
    if TEARDOWN_DONE.swap(true, Ordering::SeqCst) {
        return;
    }
    container.teardown();
}

/// Install a Ctrl+C handler that tears down and exits.
pub fn install_signal_handler(container: Arc<ContainerBackend>) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, tearing down");
        teardown_once(&container);
        std::process::exit(0);
    })
    .context("failed to set Ctrl+C handler")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunbox_core::config::ContainerSettings;

    #[test]
    fn test_teardown_runs_once() {
        let backend = ContainerBackend::new(
            ContainerSettings {
                image: "oven/bun:latest".to_string(),
                cpus: "1".to_string(),
                memory: "512m".to_string(),
            },
            std::env::temp_dir().join("bunbox-shutdown-test"),
        );
        teardown_once(&backend);
        // second call is a guarded no-op
        teardown_once(&backend);
        assert!(TEARDOWN_DONE.load(Ordering::SeqCst));
    }
}
