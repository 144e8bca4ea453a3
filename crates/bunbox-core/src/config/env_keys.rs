//! Central registry of environment variable names.
//!
//! Every `BUNBOX_*` key the broker reads is declared here so the full
//! surface is greppable in one place.

pub mod log {
    pub const LEVEL: &str = "BUNBOX_LOG_LEVEL";
    pub const JSON: &str = "BUNBOX_LOG_JSON";
    pub const QUIET: &str = "BUNBOX_QUIET";
    pub const AUDIT: &str = "BUNBOX_AUDIT_LOG";
}

pub mod exec {
    /// Execution backend selector: "preamble" (default) or "container".
    pub const BACKEND: &str = "BUNBOX_BACKEND";
    pub const TIMEOUT_SECS: &str = "BUNBOX_TIMEOUT_SECS";
}

pub mod proxy {
    pub const PORT: &str = "BUNBOX_PROXY_PORT";
}

pub mod container {
    pub const IMAGE: &str = "BUNBOX_CONTAINER_IMAGE";
    pub const CPUS: &str = "BUNBOX_CONTAINER_CPUS";
    pub const MEMORY: &str = "BUNBOX_CONTAINER_MEMORY";
}

pub mod paths {
    /// Overrides the `~/.bunbox` home directory.
    pub const HOME: &str = "BUNBOX_HOME";
}
