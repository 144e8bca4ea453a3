//! Env allowlist store: ambient `BUNBOX_ENV_*` variables merged with the
//! dotenv secret file.
//!
//! The merged snapshot is what the sandbox preamble is allowed to show
//! user code. The file wins over ambient variables; a watcher reloads
//! the snapshot on change so long-running brokers pick up edits.

use anyhow::{bail, Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Ambient variables with this prefix join the allowlist, prefix stripped.
pub const ENV_PREFIX: &str = "BUNBOX_ENV_";

/// Debounce for file events; batches rapid saves into one reload.
const WATCH_DEBOUNCE_MS: u64 = 500;

/// Whether `name` is a valid allowlist variable name.
pub fn is_valid_var_name(name: &str) -> bool {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env var name regex compiles");
    re.is_match(name)
}

/// Parse dotenv-style content: blank lines and `#` comments skipped,
/// split at the first `=`, both sides trimmed, one pair of matching
/// outer quotes stripped.
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else { continue };
        let key = line[..eq].trim();
        let mut value = line[eq + 1..].trim();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            let quoted = (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'');
            if quoted {
                value = &value[1..value.len() - 1];
            }
        }
        if !key.is_empty() {
            vars.insert(key.to_string(), value.to_string());
        }
    }
    vars
}

/// Serialise a map back to dotenv form, quoting values that contain
/// space, quote, or newline.
pub fn serialize_env_file(vars: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        let needs_quotes = value.contains(' ')
            || value.contains('"')
            || value.contains('\'')
            || value.contains('\n');
        if needs_quotes {
            out.push_str(&format!("{}=\"{}\"\n", key, value));
        } else {
            out.push_str(&format!("{}={}\n", key, value));
        }
    }
    out
}

/// Shared snapshot of the env allowlist.
#[derive(Clone)]
pub struct EnvStore {
    path: PathBuf,
    vars: Arc<RwLock<BTreeMap<String, String>>>,
}

impl EnvStore {
    /// Load from ambient `BUNBOX_ENV_*` variables and the dotenv file at
    /// `path`. The file does not have to exist yet.
    pub fn load(path: PathBuf) -> Self {
        let vars = Self::read_merged(&path);
        Self {
            path,
            vars: Arc::new(RwLock::new(vars)),
        }
    }

    fn read_merged(path: &Path) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                if is_valid_var_name(stripped) {
                    vars.insert(stripped.to_string(), value);
                }
            }
        }
        // file values take precedence over ambient ones
        if let Ok(content) = std::fs::read_to_string(path) {
            vars.extend(parse_env_file(&content));
        }
        vars
    }

    /// Re-read both sources into the snapshot.
    pub fn reload(&self) {
        *self.vars.write().expect("env store lock") = Self::read_merged(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.read().expect("env store lock").get(name).cloned()
    }

    /// Allowlisted variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.vars.read().expect("env store lock").keys().cloned().collect()
    }

    /// Copy of the merged snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars.read().expect("env store lock").clone()
    }

    /// Set a variable in the file and refresh the snapshot.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        if !is_valid_var_name(name) {
            bail!(
                "Invalid variable name '{}': must match ^[A-Za-z_][A-Za-z0-9_]*$",
                name
            );
        }
        let mut file_vars = std::fs::read_to_string(&self.path)
            .map(|content| parse_env_file(&content))
            .unwrap_or_default();
        file_vars.insert(name.to_string(), value.to_string());
        self.write_file(&file_vars)?;
        self.reload();
        Ok(())
    }

    /// Remove a variable from the file and refresh the snapshot.
    /// Returns whether it was present in the file.
    pub fn unset(&self, name: &str) -> Result<bool> {
        if !is_valid_var_name(name) {
            bail!("Invalid variable name '{}'", name);
        }
        let mut file_vars = std::fs::read_to_string(&self.path)
            .map(|content| parse_env_file(&content))
            .unwrap_or_default();
        let removed = file_vars.remove(name).is_some();
        if removed {
            self.write_file(&file_vars)?;
            self.reload();
        }
        Ok(removed)
    }

    fn write_file(&self, vars: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, serialize_env_file(vars))
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Watches the dotenv file and reloads the store on change.
///
/// Held for its lifetime; dropping it stops the watch. `on_change` runs
/// after each reload so the broker can invalidate a running container.
pub struct EnvWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl EnvWatcher {
    pub fn spawn<F>(store: EnvStore, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let path = store.path().to_path_buf();
        let watch_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_dir)
            .with_context(|| format!("failed to create {}", watch_dir.display()))?;

        let file_name = path.file_name().map(|n| n.to_os_string());
        let mut debouncer = new_debouncer(
            Duration::from_millis(WATCH_DEBOUNCE_MS),
            move |res: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    let relevant = events.iter().any(|event| {
                        event.path == path
                            || event.path.file_name().map(|n| n.to_os_string()) == file_name
                    });
                    if relevant {
                        store.reload();
                        tracing::info!(path = %path.display(), "Env file changed, allowlist reloaded");
                        on_change();
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Env file watch error"),
            },
        )
        .context("failed to create env file watcher")?;

        // watch the directory, not the file: editors replace the file on save
        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_dir.display()))?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_blank_and_comments() {
        let vars = parse_env_file("# comment\n\nAPI_KEY=abc\n  # indented comment\nB=2\n");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["API_KEY"], "abc");
        assert_eq!(vars["B"], "2");
    }

    #[test]
    fn test_parse_splits_at_first_equals() {
        let vars = parse_env_file("URL=https://example.com/?a=1\n");
        assert_eq!(vars["URL"], "https://example.com/?a=1");
    }

    #[test]
    fn test_parse_strips_matching_quotes() {
        let vars = parse_env_file("A=\"quoted value\"\nB='single'\nC=\"mismatched'\n");
        assert_eq!(vars["A"], "quoted value");
        assert_eq!(vars["B"], "single");
        assert_eq!(vars["C"], "\"mismatched'");
    }

    #[test]
    fn test_serialize_quotes_when_needed() {
        let mut vars = BTreeMap::new();
        vars.insert("PLAIN".to_string(), "abc".to_string());
        vars.insert("SPACED".to_string(), "a b".to_string());
        let out = serialize_env_file(&vars);
        assert!(out.contains("PLAIN=abc\n"));
        assert!(out.contains("SPACED=\"a b\"\n"));
    }

    #[test]
    fn test_parse_serialize_roundtrip() {
        let mut vars = BTreeMap::new();
        vars.insert("API_KEY".to_string(), "abc".to_string());
        vars.insert("WITH_SPACE".to_string(), "hello world".to_string());
        vars.insert("_UNDER".to_string(), "x=y".to_string());
        assert_eq!(parse_env_file(&serialize_env_file(&vars)), vars);
    }

    #[test]
    fn test_var_name_validation() {
        assert!(is_valid_var_name("API_KEY"));
        assert!(is_valid_var_name("_private"));
        assert!(!is_valid_var_name("1BAD"));
        assert!(!is_valid_var_name("WITH-DASH"));
        assert!(!is_valid_var_name(""));
    }

    #[test]
    fn test_store_set_get_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvStore::load(dir.path().join(".bunbox-env"));
        store.set("API_KEY", "abc").unwrap();
        assert_eq!(store.get("API_KEY").as_deref(), Some("abc"));
        assert_eq!(store.names(), vec!["API_KEY".to_string()]);

        assert!(store.unset("API_KEY").unwrap());
        assert!(store.get("API_KEY").is_none());
        assert!(!store.unset("API_KEY").unwrap());
    }

    #[test]
    fn test_store_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvStore::load(dir.path().join(".bunbox-env"));
        assert!(store.set("9BAD", "x").is_err());
        assert!(store.get("9BAD").is_none());
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".bunbox-env");
        let store = EnvStore::load(path.clone());
        assert!(store.get("TOKEN").is_none());
        std::fs::write(&path, "TOKEN=\"abc\"\n").unwrap();
        store.reload();
        assert_eq!(store.get("TOKEN").as_deref(), Some("abc"));
    }
}
