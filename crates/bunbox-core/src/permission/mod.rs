//! Capability model, matching algebra, and the grant store.

mod matcher;
mod model;
mod store;

pub use matcher::{match_env_var, match_path, match_permission};
pub use model::{Capability, FileOperation, HttpMethod};
pub use store::PermissionStore;
