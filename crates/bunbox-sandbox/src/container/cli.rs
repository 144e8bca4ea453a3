//! Thin wrapper over the container CLI.
//!
//! Everything the backend needs from `docker`: image queries, detached
//! runs, execs (batch and interactive), inspection, stop, remove. Output
//! parsing is deliberately loose string matching over the human-readable
//! listings, the same contract the CLI has kept stable for years.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};

use crate::common::{wait_with_timeout, ProcessOutput};

/// Fixed binary name the backend shells out to.
pub const CONTAINER_BIN: &str = "docker";

/// Located and version-checked container CLI.
pub struct ContainerCli {
    bin: PathBuf,
}

impl ContainerCli {
    /// Locate the binary and confirm it answers `--version`.
    pub fn locate() -> Result<Self> {
        let bin = which::which(CONTAINER_BIN)
            .with_context(|| format!("container CLI '{}' not found in PATH", CONTAINER_BIN))?;
        let output = Command::new(&bin)
            .arg("--version")
            .output()
            .context("failed to run container CLI")?;
        if !output.status.success() {
            bail!("container CLI is present but '--version' failed");
        }
        Ok(Self { bin })
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {} {}", CONTAINER_BIN, args.join(" ")))
    }

    fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                CONTAINER_BIN,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Whether `name:tag` appears in the local image listing.
    pub fn image_exists(&self, name: &str, tag: &str) -> Result<bool> {
        let listing = self.run_ok(&["image", "list"])?;
        Ok(image_listed(&listing, name, tag))
    }

    pub fn pull(&self, reference: &str) -> Result<()> {
        self.run_ok(&["image", "pull", reference])?;
        Ok(())
    }

    /// Start a detached container idling on `sleep infinity`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_detached(
        &self,
        name: &str,
        image: &str,
        volumes: &[(String, String)],
        cpus: &str,
        memory: &str,
        envs: &[(String, String)],
    ) -> Result<()> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            name.into(),
        ];
        for (host, container) in volumes {
            args.push("--volume".into());
            args.push(format!("{}:{}", host, container));
        }
        args.push("--cpus".into());
        args.push(cpus.into());
        args.push("--memory".into());
        args.push(memory.into());
        for (key, value) in envs {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.into());
        args.push("sleep".into());
        args.push("infinity".into());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_ok(&refs)?;
        Ok(())
    }

    /// Whether the container reports a running state.
    pub fn is_running(&self, name: &str) -> bool {
        self.run(&["inspect", name])
            .map(|output| {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("Running")
            })
            .unwrap_or(false)
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.run_ok(&["stop", name])?;
        Ok(())
    }

    pub fn rm(&self, name: &str) -> Result<()> {
        self.run_ok(&["rm", name])?;
        Ok(())
    }

    /// Run a command inside the container, draining output under a
    /// timeout.
    pub fn exec(
        &self,
        name: &str,
        workdir: Option<&str>,
        command: &[&str],
        timeout_secs: u64,
    ) -> Result<ProcessOutput> {
        let mut args: Vec<&str> = vec!["exec"];
        if let Some(dir) = workdir {
            args.push("--workdir");
            args.push(dir);
        }
        args.push(name);
        args.extend(command);

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to exec in container {}", name))?;
        wait_with_timeout(&mut child, timeout_secs)
    }

    /// Spawn an interactive exec child with piped stdio. The caller owns
    /// the child (this is how the language service is hosted).
    pub fn exec_interactive(&self, name: &str, command: &[&str]) -> Result<Child> {
        let mut args: Vec<&str> = vec!["exec", "-i", name];
        args.extend(command);
        Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start interactive exec in {}", name))
    }
}

/// An image is present when one listing line carries both substrings.
fn image_listed(listing: &str, name: &str, tag: &str) -> bool {
    listing
        .lines()
        .any(|line| line.contains(name) && line.contains(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
NAME            TAG       DIGEST
oven/bun        latest    sha256:aaa
oven/bun        1.1       sha256:bbb
library/alpine  latest    sha256:ccc
";

    #[test]
    fn test_image_listed_requires_same_line() {
        assert!(image_listed(LISTING, "oven/bun", "latest"));
        assert!(image_listed(LISTING, "oven/bun", "1.1"));
        assert!(!image_listed(LISTING, "oven/bun", "0.9"));
        // tag exists, but on another image's line
        assert!(!image_listed(LISTING, "missing/image", "latest"));
    }

    #[test]
    fn test_image_listed_empty_listing() {
        assert!(!image_listed("", "oven/bun", "latest"));
        assert!(!image_listed("NAME TAG DIGEST\n", "oven/bun", "latest"));
    }
}
