//! Container execution backend: one long-lived isolated Bun runtime per
//! process, created lazily on first use and recreated when it dies.
//!
//! The session container idles on `sleep infinity` with two bind
//! mounts: a persistent package cache (`bunbox-cache` volume at
//! `/cache`) and the per-session work directory at `/workspace/code`.
//! Source files are written on the host side of the work directory and
//! executed via `exec` inside the container; every execution is
//! type-checked first through the language service bound to the
//! container.

mod cli;

pub use cli::{ContainerCli, CONTAINER_BIN};

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

use bunbox_core::config::ContainerSettings;
use bunbox_core::observability;
use bunbox_core::protocol::ExecutionResult;

use crate::langsvc::{ExportedFunction, TsServer};

/// Named volume holding the shared package cache across sessions.
pub const CACHE_VOLUME: &str = "bunbox-cache";
/// Cache mount point inside the container.
pub const CACHE_MOUNT: &str = "/cache";
/// Work directory mount point inside the container.
pub const CODE_MOUNT: &str = "/workspace/code";

/// Fixed location of the type checker inside the cache mount.
const TSSERVER_PATH: &str = "/cache/node_modules/.bin/tsserver";

/// Budget for installing the type checker into the cache.
const WARMUP_TIMEOUT_SECS: u64 = 60;

/// Package-manager config pointing the install cache at the mounted
/// volume, written into the work directory before start.
const BUNFIG_TOML: &str = "[install.cache]\ndir = \"/cache\"\n";

const TSCONFIG_JSON: &str = r#"{
  "compilerOptions": {
    "target": "esnext",
    "module": "esnext",
    "moduleResolution": "bundler",
    "strict": true,
    "types": ["bun-types"]
  }
}
"#;

/// One live session: container, host work directory, and the language
/// service bound to the container instance.
struct SessionContainer {
    name: String,
    work_dir: PathBuf,
    langsvc: TsServer,
}

impl SessionContainer {
    /// Tear the session down in order: language service, container
    /// stop, container remove, work directory.
    fn teardown(mut self, cli: &ContainerCli) {
        self.langsvc.stop();
        if let Err(e) = cli.stop(&self.name) {
            tracing::warn!(container = %self.name, error = %e, "Failed to stop container");
        }
        if let Err(e) = cli.rm(&self.name) {
            tracing::warn!(container = %self.name, error = %e, "Failed to remove container");
        }
        let _ = fs::remove_dir_all(&self.work_dir);
        tracing::info!(container = %self.name, "Session container removed");
    }
}

/// Owner of the (at most one) session container for this process.
pub struct ContainerBackend {
    settings: ContainerSettings,
    work_root: PathBuf,
    inner: Mutex<Option<SessionContainer>>,
}

impl ContainerBackend {
    pub fn new(settings: ContainerSettings, work_root: PathBuf) -> Self {
        Self {
            settings,
            work_root,
            inner: Mutex::new(None),
        }
    }

    /// Whether a session is currently held (used to gate type
    /// introspection, which never lazily starts a container).
    pub fn is_active(&self) -> bool {
        self.inner
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Execute source text in the session container, type-checking
    /// first. Always returns a uniform result record.
    pub fn execute(&self, source: &str, timeout_secs: u64) -> ExecutionResult {
        let cli = match ContainerCli::locate() {
            Ok(cli) => cli,
            Err(e) => return ExecutionResult::fail(e.to_string()),
        };
        let mut guard = self.inner.lock().expect("container backend lock");

        // drop a dead handle before use so the next run starts fresh
        let session_dead = guard
            .as_ref()
            .map(|session| !cli.is_running(&session.name))
            .unwrap_or(false);
        if session_dead {
            if let Some(dead) = guard.take() {
                observability::security_container_recreated(&dead.name, "not_running");
                dead.teardown(&cli);
            }
        }
        if guard.is_none() {
            match self.start_session(&cli) {
                Ok(session) => *guard = Some(session),
                Err(e) => {
                    return ExecutionResult::fail(format!(
                        "failed to start session container: {:#}",
                        e
                    ));
                }
            }
        }
        let Some(session) = guard.as_mut() else {
            return ExecutionResult::fail("session container unavailable");
        };

        let file_name = format!("run-{}.ts", Uuid::new_v4().simple());
        let host_path = session.work_dir.join(&file_name);
        if let Err(e) = fs::write(&host_path, source) {
            return ExecutionResult::fail(format!("failed to write source: {}", e));
        }
        let container_path = format!("{}/{}", CODE_MOUNT, file_name);

        let hash = observability::code_hash(source);
        observability::audit_execution_started("container", &hash, timeout_secs);
        let start = Instant::now();

        let result = match session.langsvc.get_diagnostics(&container_path) {
            Ok(diagnostics) if diagnostics.is_empty() => {
                match cli.exec(
                    &session.name,
                    Some(CODE_MOUNT),
                    &["bun", "run", file_name.as_str()],
                    timeout_secs,
                ) {
                    Ok(output) => {
                        observability::audit_execution_completed(
                            "container",
                            &hash,
                            output.exit_code,
                            start.elapsed().as_millis() as u64,
                            output.stdout.len(),
                        );
                        if output.timed_out {
                            ExecutionResult {
                                success: false,
                                output: None,
                                error: Some(format!(
                                    "Execution timed out after {} seconds",
                                    timeout_secs
                                )),
                                permission_required: None,
                                exit_code: Some(output.exit_code),
                            }
                        } else if output.exit_code == 0 {
                            ExecutionResult::ok(output.stdout)
                        } else {
                            ExecutionResult {
                                success: false,
                                output: None,
                                error: Some(output.stderr),
                                permission_required: None,
                                exit_code: Some(output.exit_code),
                            }
                        }
                    }
                    Err(e) => ExecutionResult::fail(format!("container exec failed: {}", e)),
                }
            }
            Ok(diagnostics) => ExecutionResult {
                success: false,
                output: None,
                error: Some(format!("TypeScript errors:\n{}", diagnostics.join("\n"))),
                permission_required: None,
                exit_code: Some(1),
            },
            Err(e) => ExecutionResult::fail(format!("type check failed: {}", e)),
        };

        let _ = fs::remove_file(&host_path);
        result
    }

    /// Exported function types for `source`, via the language service.
    /// Requires an already-active session; never lazily starts one.
    pub fn exported_function_types(&self, source: &str) -> Result<Vec<ExportedFunction>> {
        let mut guard = self.inner.lock().expect("container backend lock");
        let Some(session) = guard.as_mut() else {
            bail!("no active session container; execute code with the container backend first");
        };

        let file_name = format!("types-{}.ts", Uuid::new_v4().simple());
        let host_path = session.work_dir.join(&file_name);
        fs::write(&host_path, source).context("failed to write source for type lookup")?;
        let container_path = format!("{}/{}", CODE_MOUNT, file_name);

        let result = session.langsvc.get_exported_function_types(&container_path);
        let _ = fs::remove_file(&host_path);
        result
    }

    /// Lazy start: ensure the image, prepare the work directory and its
    /// config files, run detached, warm the cache (best effort), and
    /// bind a fresh language service to the instance.
    fn start_session(&self, cli: &ContainerCli) -> Result<SessionContainer> {
        let (image_name, image_tag) = self.settings.image_parts();
        if !cli.image_exists(image_name, image_tag)? {
            tracing::info!(image = %self.settings.image, "Base image missing, pulling");
            cli.pull(&self.settings.image)?;
        }

        let work_dir = self.work_root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create work dir {}", work_dir.display()))?;
        fs::write(work_dir.join("bunfig.toml"), BUNFIG_TOML)?;
        fs::write(work_dir.join("tsconfig.json"), TSCONFIG_JSON)?;

        let name = format!("bunbox-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let work_dir_str = work_dir.to_string_lossy().to_string();
        cli.run_detached(
            &name,
            &self.settings.image,
            &[
                (CACHE_VOLUME.to_string(), CACHE_MOUNT.to_string()),
                (work_dir_str, CODE_MOUNT.to_string()),
            ],
            &self.settings.cpus,
            &self.settings.memory,
            &[("BUN_INSTALL_CACHE_DIR".to_string(), CACHE_MOUNT.to_string())],
        )
        .context("container run failed")?;
        tracing::info!(container = %name, image = %self.settings.image, "Session container started");

        // best effort: execution still works without extended types
        match cli.exec(
            &name,
            Some(CACHE_MOUNT),
            &["bun", "add", "typescript", "@types/bun"],
            WARMUP_TIMEOUT_SECS,
        ) {
            Ok(output) if output.exit_code == 0 && !output.timed_out => {
                tracing::debug!(container = %name, "Type checker installed into cache");
            }
            Ok(output) => {
                tracing::warn!(
                    container = %name,
                    exit_code = output.exit_code,
                    timed_out = output.timed_out,
                    "Cache warmup failed, continuing without extended types"
                );
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Cache warmup failed, continuing");
            }
        }

        let child = cli
            .exec_interactive(&name, &[TSSERVER_PATH, "--useInferredProjectPerProjectRoot"])
            .context("failed to start language service")?;
        let langsvc = TsServer::start(child)?;

        Ok(SessionContainer {
            name,
            work_dir,
            langsvc,
        })
    }

    /// Tear down the session if one exists. Safe to call repeatedly and
    /// from the env-watcher callback.
    pub fn teardown(&self) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        if let Some(session) = guard.take() {
            match ContainerCli::locate() {
                Ok(cli) => session.teardown(&cli),
                Err(e) => tracing::warn!(error = %e, "Container CLI gone, skipping teardown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ContainerBackend {
        ContainerBackend::new(
            ContainerSettings {
                image: "oven/bun:latest".to_string(),
                cpus: "1".to_string(),
                memory: "512m".to_string(),
            },
            std::env::temp_dir().join("bunbox-test-work"),
        )
    }

    #[test]
    fn test_inactive_backend_refuses_type_lookup() {
        let err = backend()
            .exported_function_types("export function f() {}")
            .unwrap_err();
        assert!(err.to_string().contains("no active session container"));
    }

    #[test]
    fn test_teardown_without_session_is_a_noop() {
        let b = backend();
        b.teardown();
        assert!(!b.is_active());
    }

    #[test]
    fn test_config_files_shapes() {
        assert!(BUNFIG_TOML.contains("[install.cache]"));
        assert!(BUNFIG_TOML.contains("/cache"));
        let parsed: serde_json::Value = serde_json::from_str(TSCONFIG_JSON).unwrap();
        assert!(parsed["compilerOptions"]["strict"].as_bool().unwrap());
    }
}
