//! Configuration: env-key registry, loading helpers, and grouped
//! config structs.

pub mod env_keys;
mod loader;
mod schema;

pub use loader::{env_bool, env_optional, env_or, env_parse};
pub use schema::{
    BackendKind, ContainerSettings, ExecutionConfig, PathsConfig, ProxySettings,
    DEFAULT_PROXY_PORT, DEFAULT_TIMEOUT_SECS,
};
