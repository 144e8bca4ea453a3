//! Control-surface state: the broker's owned stores and backends.
//!
//! Everything that was ambient in earlier designs (the grant set, the
//! session container, the language service bound to it) is an owned
//! field here and threaded explicitly through the handlers.

use std::sync::Arc;

use anyhow::Result;

use bunbox_core::config::{ContainerSettings, ExecutionConfig, PathsConfig, ProxySettings};
use bunbox_core::envfile::{EnvStore, EnvWatcher};
use bunbox_core::permission::PermissionStore;
use bunbox_core::snippet::SnippetStore;
use bunbox_sandbox::container::ContainerBackend;
use bunbox_sandbox::executor::PreambleExecutor;
use bunbox_sandbox::proxy::{self, ProxyHandle};

/// Broker state shared across control-surface requests.
pub struct McpServer {
    pub permissions: PermissionStore,
    pub snippets: SnippetStore,
    pub env: EnvStore,
    pub exec_config: ExecutionConfig,
    pub executor: PreambleExecutor,
    pub container: Arc<ContainerBackend>,
    proxy: Option<ProxyHandle>,
    _env_watcher: Option<EnvWatcher>,
}

impl McpServer {
    /// Assemble the broker: stores, the permission proxy, both
    /// backends, and the env-file watcher that invalidates a running
    /// container when secrets change.
    pub fn bootstrap(exec_config: ExecutionConfig) -> Result<Self> {
        let paths = PathsConfig::from_env();
        let permissions = PermissionStore::new();
        let snippets = SnippetStore::open(paths.snippets_dir())?;
        let env = EnvStore::load(paths.env_file());

        let proxy_settings = ProxySettings::from_env();
        let proxy = proxy::start(permissions.clone(), proxy_settings.port)?;
        let executor = PreambleExecutor::new(proxy.url());

        let container = Arc::new(ContainerBackend::new(
            ContainerSettings::from_env(),
            paths.work_root(),
        ));

        let watcher_container = container.clone();
        let env_watcher = match EnvWatcher::spawn(env.clone(), move || {
            watcher_container.teardown();
        }) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Env file watcher unavailable");
                None
            }
        };

        Ok(Self {
            permissions,
            snippets,
            env,
            exec_config,
            executor,
            container,
            proxy: Some(proxy),
            _env_watcher: env_watcher,
        })
    }

    /// Stop the proxy. The container is handled by the shutdown path.
    pub fn stop_proxy(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            proxy.shutdown();
        }
    }

    #[cfg(test)]
    pub fn for_tests(dir: &std::path::Path, exec_config: ExecutionConfig) -> Self {
        let permissions = PermissionStore::new();
        let snippets = SnippetStore::open(dir.join("snippets")).expect("test snippet store");
        let env = EnvStore::load(dir.join(".bunbox-env"));
        // no proxy running: the preamble executor fails closed in tests
        let executor = PreambleExecutor::new("http://127.0.0.1:9".to_string());
        let container = Arc::new(ContainerBackend::new(
            ContainerSettings {
                image: "oven/bun:latest".to_string(),
                cpus: "1".to_string(),
                memory: "512m".to_string(),
            },
            dir.join("work"),
        ));
        Self {
            permissions,
            snippets,
            env,
            exec_config,
            executor,
            container,
            proxy: None,
            _env_watcher: None,
        }
    }
}
