//! On-disk snippet store.
//!
//! One snippet per file under the snippet directory, filename
//! `<name>.ts`. The description is extracted from the first JSDoc block
//! carrying an `@description` tag; code without one cannot be saved.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A stored snippet with its full source text.
#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub name: String,
    pub description: String,
    pub code: String,
}

/// Listing entry: name and description only.
#[derive(Debug, Clone, Serialize)]
pub struct SnippetInfo {
    pub name: String,
    pub description: String,
}

/// Whether `name` is a valid snippet name.
pub fn is_valid_name(name: &str) -> bool {
    let re = Regex::new(r"^[A-Za-z0-9_-]+$").expect("snippet name regex compiles");
    re.is_match(name)
}

/// Extract the description from the first JSDoc block containing an
/// `@description` tag. The tag text runs to the end of its line, with
/// trailing asterisks and whitespace stripped.
pub fn extract_description(code: &str) -> Option<String> {
    let block_re = Regex::new(r"(?s)/\*\*.*?\*/").expect("jsdoc block regex compiles");
    let tag_re = Regex::new(r"@description\s+([^\r\n]+)").expect("description tag regex compiles");
    for block in block_re.find_iter(code) {
        if let Some(cap) = tag_re.captures(block.as_str()) {
            let text = cap[1]
                .trim_end_matches(|c: char| c == '*' || c == '/' || c.is_whitespace())
                .trim()
                .to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Filesystem-backed snippet store.
pub struct SnippetStore {
    dir: PathBuf,
}

impl SnippetStore {
    /// Open the store at `dir`, creating the directory if needed.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snippet directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.ts", name))
    }

    /// Validate and persist a snippet. Validation order: name, then the
    /// required `@description` tag. The write is atomic (temp file in the
    /// same directory, then rename), so a reader never sees a torn file.
    pub fn save(&self, name: &str, code: &str) -> Result<Snippet> {
        if !is_valid_name(name) {
            bail!(
                "Invalid snippet name '{}': only letters, digits, underscore and hyphen are allowed",
                name
            );
        }
        let Some(description) = extract_description(code) else {
            bail!("Snippet code must contain a JSDoc block with an @description tag");
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create snippet temp file")?;
        tmp.write_all(code.as_bytes())
            .context("failed to write snippet")?;
        tmp.persist(self.path_for(name))
            .with_context(|| format!("failed to persist snippet '{}'", name))?;

        tracing::debug!(snippet = %name, "Snippet saved");
        Ok(Snippet {
            name: name.to_string(),
            description,
            code: code.to_string(),
        })
    }

    /// Load a snippet by name. `Ok(None)` when it does not exist.
    pub fn get(&self, name: &str) -> Result<Option<Snippet>> {
        if !is_valid_name(name) {
            bail!("Invalid snippet name '{}'", name);
        }
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let code = fs::read_to_string(&path)
            .with_context(|| format!("failed to read snippet '{}'", name))?;
        let description = extract_description(&code).unwrap_or_default();
        Ok(Some(Snippet {
            name: name.to_string(),
            description,
            code,
        }))
    }

    /// List all snippets, sorted by name.
    pub fn list(&self) -> Result<Vec<SnippetInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).context("failed to read snippet directory")? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ts") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_name(name) {
                continue;
            }
            let description = fs::read_to_string(&path)
                .ok()
                .and_then(|code| extract_description(&code))
                .unwrap_or_default();
            entries.push(SnippetInfo {
                name: name.to_string(),
                description,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Delete a snippet. Returns whether a file was removed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        if !is_valid_name(name) {
            bail!("Invalid snippet name '{}'", name);
        }
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to delete snippet '{}'", name))?;
        tracing::debug!(snippet = %name, "Snippet deleted");
        Ok(true)
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.path_for(name).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SnippetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnippetStore::open(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("util"));
        assert!(is_valid_name("my-snippet_2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("../escape"));
        assert!(!is_valid_name("dot.name"));
    }

    #[test]
    fn test_extract_description() {
        let code = "/** @description Fetch helpers */\nexport const X = 1;";
        assert_eq!(extract_description(code).as_deref(), Some("Fetch helpers"));
    }

    #[test]
    fn test_extract_description_multiline_block() {
        let code = "/**\n * Utilities.\n * @description String utilities **\n */\nexport const Y = 2;";
        assert_eq!(extract_description(code).as_deref(), Some("String utilities"));
    }

    #[test]
    fn test_extract_description_first_tagged_block_wins() {
        let code = "/** plain docs */\n/** @description first */\ncode\n/** @description second */";
        assert_eq!(extract_description(code).as_deref(), Some("first"));
    }

    #[test]
    fn test_extract_description_absent() {
        assert!(extract_description("// no jsdoc here").is_none());
        assert!(extract_description("/** docs without the tag */").is_none());
    }

    #[test]
    fn test_save_get_roundtrip() {
        let (_dir, store) = store();
        let code = "/** @description util */\nexport const X = 42;";
        let saved = store.save("util", code).unwrap();
        assert_eq!(saved.description, "util");

        let loaded = store.get("util").unwrap().expect("snippet exists");
        assert_eq!(loaded.code, code);
        assert_eq!(loaded.description, "util");
    }

    #[test]
    fn test_save_rejects_missing_description() {
        let (_dir, store) = store();
        let err = store.save("util", "export const X = 1;").unwrap_err();
        assert!(err.to_string().contains("@description"));
        assert!(!store.exists("util"));
    }

    #[test]
    fn test_save_rejects_bad_name() {
        let (_dir, store) = store();
        let err = store
            .save("../evil", "/** @description x */")
            .unwrap_err();
        assert!(err.to_string().contains("Invalid snippet name"));
    }

    #[test]
    fn test_list_and_delete() {
        let (_dir, store) = store();
        store.save("b", "/** @description second */").unwrap();
        store.save("a", "/** @description first */").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a");
        assert_eq!(listed[1].name, "b");

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(!store.exists("a"));
        assert!(store.exists("b"));
    }
}
