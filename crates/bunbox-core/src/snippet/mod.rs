//! Snippet persistence and the directive-driven inliner.

mod inliner;
mod store;

pub use inliner::{inline_snippets, parse_directives, strip_exports, InlineError};
pub use store::{extract_description, is_valid_name, Snippet, SnippetInfo, SnippetStore};
