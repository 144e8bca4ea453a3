//! bunbox: capability-gated TypeScript/JavaScript execution broker.
//!
//! `bunbox serve` runs the MCP control surface over stdio; the other
//! subcommands are one-shot conveniences over the same components.

mod cli;
mod mcp;
mod shutdown;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};

use bunbox_core::config::{BackendKind, ExecutionConfig, PathsConfig, ProxySettings};
use bunbox_core::envfile::EnvStore;
use bunbox_core::snippet::SnippetStore;

use cli::{Cli, Commands, EnvAction, PermissionAction, SnippetAction};
use mcp::state::McpServer;

fn main() {
    bunbox_core::observability::init_tracing();
    let args = Cli::parse();
    let code = match run(args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Serve { backend, timeout } => cmd_serve(backend, timeout),
        Commands::Exec {
            file,
            code,
            backend,
            timeout,
        } => cmd_exec(file, code, backend, timeout),
        Commands::Snippet { action } => cmd_snippet(action),
        Commands::Permission { action } => cmd_permission(action),
        Commands::Env { action } => cmd_env(action),
    }
}

fn parse_backend(raw: Option<String>) -> Result<Option<BackendKind>> {
    match raw {
        None => Ok(None),
        Some(raw) => match BackendKind::parse(&raw) {
            Some(kind) => Ok(Some(kind)),
            None => bail!("unknown backend '{}': expected 'preamble' or 'container'", raw),
        },
    }
}

fn cmd_serve(backend: Option<String>, timeout: Option<u64>) -> Result<()> {
    let exec_config =
        ExecutionConfig::from_env().with_cli_overrides(parse_backend(backend)?, timeout);
    let mut server = McpServer::bootstrap(exec_config)?;
    shutdown::install_signal_handler(server.container.clone())?;
    tracing::info!(backend = %exec_config.backend.as_str(), "bunbox control surface ready");

    let served = mcp::serve_mcp_stdio(&server);

    shutdown::teardown_once(&server.container);
    server.stop_proxy();
    served
}

fn cmd_exec(
    file: Option<std::path::PathBuf>,
    code: Option<String>,
    backend: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let source = match (file, code) {
        (Some(path), None) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(code)) => code,
        (None, None) | (Some(_), Some(_)) => bail!("pass a file path or --code, not both"),
    };

    let exec_config =
        ExecutionConfig::from_env().with_cli_overrides(parse_backend(backend)?, timeout);
    let mut server = McpServer::bootstrap(exec_config)?;
    shutdown::install_signal_handler(server.container.clone())?;

    let result = mcp::handlers::handle_execute_code(&server, &json!({"code": source}))?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    shutdown::teardown_once(&server.container);
    server.stop_proxy();
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn cmd_snippet(action: SnippetAction) -> Result<()> {
    let store = SnippetStore::open(PathsConfig::from_env().snippets_dir())?;
    match action {
        SnippetAction::List => {
            for snippet in store.list()? {
                println!("{}\t{}", snippet.name, snippet.description);
            }
        }
        SnippetAction::Get { name } => match store.get(&name)? {
            Some(snippet) => print!("{}", snippet.code),
            None => bail!("Snippet '{}' not found", name),
        },
        SnippetAction::Save { name, file } => {
            let code = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let saved = store.save(&name, &code)?;
            println!("Saved '{}': {}", saved.name, saved.description);
        }
        SnippetAction::Delete { name } => {
            if store.delete(&name)? {
                println!("Deleted '{}'", name);
            } else {
                bail!("Snippet '{}' not found", name);
            }
        }
    }
    Ok(())
}

/// Permission commands talk to the running broker's proxy; a fresh
/// process has no store of its own to mutate.
fn cmd_permission(action: PermissionAction) -> Result<()> {
    let base = ProxySettings::from_env().url();
    let post = |route: &str, body: Option<Value>| -> Result<Value> {
        let request = ureq::post(&format!("{}{}", base, route));
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match response {
            Ok(response) => response.into_json().context("invalid proxy response"),
            Err(ureq::Error::Status(status, response)) => {
                bail!(
                    "proxy returned {}: {}",
                    status,
                    response.into_string().unwrap_or_default()
                )
            }
            Err(_) => bail!(
                "permission proxy not reachable at {} (is `bunbox serve` running?)",
                base
            ),
        }
    };

    match action {
        PermissionAction::Grant { json } => {
            let capability: Value =
                serde_json::from_str(&json).context("capability is not valid JSON")?;
            let result = post("/grant", Some(capability))?;
            println!("{}", result);
        }
        PermissionAction::List => {
            let response = ureq::get(&format!("{}/permissions", base))
                .call()
                .map_err(|_| {
                    anyhow::anyhow!(
                        "permission proxy not reachable at {} (is `bunbox serve` running?)",
                        base
                    )
                })?;
            let body: Value = response.into_json().context("invalid proxy response")?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        PermissionAction::Revoke { json } => {
            let capability: Value =
                serde_json::from_str(&json).context("capability is not valid JSON")?;
            let result = post("/revoke", Some(capability))?;
            println!("{}", result);
        }
        PermissionAction::Clear => {
            let result = post("/clear", None)?;
            println!("{}", result);
        }
    }
    Ok(())
}

fn cmd_env(action: EnvAction) -> Result<()> {
    let store = EnvStore::load(PathsConfig::from_env().env_file());
    match action {
        EnvAction::List => {
            for name in store.names() {
                println!("{}", name);
            }
        }
        EnvAction::Get { name } => match store.get(&name) {
            Some(value) => println!("{}", value),
            None => bail!("'{}' is not in the allowlist", name),
        },
        EnvAction::Set { name, value } => {
            store.set(&name, &value)?;
            println!("Set {}", name);
        }
        EnvAction::Unset { name } => {
            if store.unset(&name)? {
                println!("Removed {}", name);
            } else {
                bail!("'{}' is not in the env file", name);
            }
        }
    }
    Ok(())
}
