//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bunbox",
    version,
    about = "Capability-gated TypeScript/JavaScript execution broker"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the MCP control surface over stdio.
    Serve {
        /// Execution backend: "preamble" or "container".
        #[arg(long, env = "BUNBOX_BACKEND")]
        backend: Option<String>,
        /// Default execution timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Execute a file or inline code once and print the result JSON.
    Exec {
        /// Path to a TypeScript/JavaScript file.
        file: Option<PathBuf>,
        /// Inline source text (alternative to a file).
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// Execution backend: "preamble" or "container".
        #[arg(long, env = "BUNBOX_BACKEND")]
        backend: Option<String>,
        /// Execution timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Manage stored snippets.
    Snippet {
        #[command(subcommand)]
        action: SnippetAction,
    },
    /// Manage granted permissions on a running broker (via its proxy).
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },
    /// Manage the sandbox env allowlist file.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
}

#[derive(Subcommand)]
pub enum SnippetAction {
    /// List snippet names and descriptions.
    List,
    /// Print one snippet's code.
    Get { name: String },
    /// Save a snippet from a file.
    Save {
        name: String,
        /// File whose contents become the snippet code.
        file: PathBuf,
    },
    /// Delete a snippet.
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum PermissionAction {
    /// Grant a capability (JSON record).
    Grant {
        /// Capability JSON, e.g. '{"type":"http","host":"example.com","description":"..."}'
        json: String,
    },
    /// List granted capabilities.
    List,
    /// Revoke a capability (JSON record, all structural duplicates).
    Revoke { json: String },
    /// Drop every grant.
    Clear,
}

#[derive(Subcommand)]
pub enum EnvAction {
    /// List allowlisted variable names.
    List,
    /// Print one variable's value.
    Get { name: String },
    /// Set a variable in the env file.
    Set { name: String, value: String },
    /// Remove a variable from the env file.
    Unset { name: String },
}
