//! Config structs grouped by domain, loaded from environment variables.

use std::path::PathBuf;

use super::env_keys;
use super::loader::{env_or, env_parse};

/// Default execution timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default permission proxy port (loopback only).
pub const DEFAULT_PROXY_PORT: u16 = 8790;

/// Which isolation strategy executes user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Host Bun runtime with the sandbox preamble preloaded (advisory).
    #[default]
    Preamble,
    /// Long-lived container with type checking before each run.
    Container,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "preamble" => Some(Self::Preamble),
            "container" => Some(Self::Container),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preamble => "preamble",
            Self::Container => "container",
        }
    }
}

/// Execution settings: backend and default timeout.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub backend: BackendKind,
    pub timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Preamble,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        let backend = super::loader::env_optional(env_keys::exec::BACKEND)
            .and_then(|raw| {
                let parsed = BackendKind::parse(&raw);
                if parsed.is_none() {
                    tracing::warn!(value = %raw, "Unknown BUNBOX_BACKEND, using preamble");
                }
                parsed
            })
            .unwrap_or_default();
        let timeout_secs =
            env_parse::<u64>(env_keys::exec::TIMEOUT_SECS).unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            backend,
            timeout_secs,
        }
    }

    /// CLI flags win over environment variables.
    pub fn with_cli_overrides(
        mut self,
        backend: Option<BackendKind>,
        timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(backend) = backend {
            self.backend = backend;
        }
        if let Some(timeout) = timeout_secs {
            self.timeout_secs = timeout;
        }
        self
    }
}

/// Permission proxy settings.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub port: u16,
}

impl ProxySettings {
    pub fn from_env() -> Self {
        Self {
            port: env_parse::<u16>(env_keys::proxy::PORT).unwrap_or(DEFAULT_PROXY_PORT),
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Container backend settings.
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Image reference, `name:tag`.
    pub image: String,
    pub cpus: String,
    pub memory: String,
}

impl ContainerSettings {
    pub fn from_env() -> Self {
        Self {
            image: env_or(env_keys::container::IMAGE, || "oven/bun:latest".to_string()),
            cpus: env_or(env_keys::container::CPUS, || "1".to_string()),
            memory: env_or(env_keys::container::MEMORY, || "512m".to_string()),
        }
    }

    /// Split the image reference into (name, tag). A missing tag means
    /// `latest`.
    pub fn image_parts(&self) -> (&str, &str) {
        match self.image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (self.image.as_str(), "latest"),
        }
    }
}

/// Filesystem layout under the bunbox home directory.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub home: PathBuf,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        let home = super::loader::env_optional(env_keys::paths::HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".bunbox")
            });
        Self { home }
    }

    pub fn snippets_dir(&self) -> PathBuf {
        self.home.join("snippets")
    }

    pub fn env_file(&self) -> PathBuf {
        self.home.join(".bunbox-env")
    }

    /// Root under which per-session container work directories live.
    pub fn work_root(&self) -> PathBuf {
        self.home.join("work")
    }
}
