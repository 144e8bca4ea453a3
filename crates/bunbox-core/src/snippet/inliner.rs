//! Snippet inliner: directive parsing, dependency resolution, and
//! composition of the final program text.
//!
//! User programs reference snippets with `// @use-snippet: <name>`
//! directives. The inliner resolves the reachable snippet graph, orders
//! it dependencies-first, strips export keywords so declarations become
//! plain script-level bindings, and prepends the result to the user
//! code. A source without directives passes through unchanged.

use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

use super::store::SnippetStore;

/// Inlining failures. Execution is never attempted after one of these.
#[derive(Debug, Error)]
pub enum InlineError {
    #[error("Snippet '{0}' not found")]
    NotFound(String),
    #[error("Circular snippet dependency: {0}")]
    Cycle(String),
    #[error("{0}")]
    Store(String),
}

/// Collect directive names in source order, deduplicated with the first
/// occurrence winning. Directives may appear anywhere in the text.
pub fn parse_directives(source: &str) -> Vec<String> {
    let re = Regex::new(r"//\s*@use-snippet\s*:\s*([A-Za-z0-9_-]+)")
        .expect("directive regex compiles");
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for cap in re.captures_iter(source) {
        let name = cap[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Strip export keywords so snippet declarations become plain
/// declarations in the composed program. Rules are line-anchored and
/// applied in a fixed order.
pub fn strip_exports(code: &str) -> String {
    const RULES: [(&str, &str); 7] = [
        (r"(?m)^(\s*)export\s+async\s+function\b", "${1}async function"),
        (r"(?m)^(\s*)export\s+function\b", "${1}function"),
        (r"(?m)^(\s*)export\s+(const|let|var)\b", "${1}${2}"),
        (r"(?m)^(\s*)export\s+abstract\s+class\b", "${1}abstract class"),
        (r"(?m)^(\s*)export\s+class\b", "${1}class"),
        (r"(?m)^(\s*)export\s+default\s+", "${1}"),
        (r"(?m)^(\s*)export\s+(type|interface)\b", "${1}${2}"),
    ];
    let mut out = code.to_string();
    for (pattern, replacement) in RULES {
        let re = Regex::new(pattern).expect("export rule compiles");
        out = re.replace_all(&out, replacement).into_owned();
    }
    out
}

struct Node {
    code: String,
    deps: Vec<String>,
}

/// Load every snippet reachable from `roots` (BFS over directives).
fn load_reachable(
    store: &SnippetStore,
    roots: &[String],
) -> Result<HashMap<String, Node>, InlineError> {
    let mut graph: HashMap<String, Node> = HashMap::new();
    let mut queue: VecDeque<String> = roots.iter().cloned().collect();
    while let Some(name) = queue.pop_front() {
        if graph.contains_key(&name) {
            continue;
        }
        let snippet = store
            .get(&name)
            .map_err(|e| InlineError::Store(e.to_string()))?
            .ok_or_else(|| InlineError::NotFound(name.clone()))?;
        let deps = parse_directives(&snippet.code);
        for dep in &deps {
            if !graph.contains_key(dep) {
                queue.push_back(dep.clone());
            }
        }
        graph.insert(
            name,
            Node {
                code: snippet.code,
                deps,
            },
        );
    }
    Ok(graph)
}

struct TopoState {
    order: Vec<String>,
    done: HashSet<String>,
    stack: Vec<String>,
    on_stack: HashSet<String>,
}

/// DFS with an on-stack set: detects cycles (reporting the full chain,
/// e.g. `a → b → a`) and emits a dependencies-first order.
fn visit(
    name: &str,
    graph: &HashMap<String, Node>,
    state: &mut TopoState,
) -> Result<(), InlineError> {
    if state.done.contains(name) {
        return Ok(());
    }
    if state.on_stack.contains(name) {
        let start = state
            .stack
            .iter()
            .position(|entry| entry == name)
            .unwrap_or(0);
        let mut chain: Vec<&str> = state.stack[start..].iter().map(String::as_str).collect();
        chain.push(name);
        return Err(InlineError::Cycle(chain.join(" → ")));
    }
    state.stack.push(name.to_string());
    state.on_stack.insert(name.to_string());
    if let Some(node) = graph.get(name) {
        for dep in &node.deps {
            visit(dep, graph, state)?;
        }
    }
    state.stack.pop();
    state.on_stack.remove(name);
    state.done.insert(name.to_string());
    state.order.push(name.to_string());
    Ok(())
}

fn topo_order(
    graph: &HashMap<String, Node>,
    roots: &[String],
) -> Result<Vec<String>, InlineError> {
    let mut state = TopoState {
        order: Vec::new(),
        done: HashSet::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
    };
    for root in roots {
        visit(root, graph, &mut state)?;
    }
    Ok(state.order)
}

/// Inline every snippet the source references into one program text.
pub fn inline_snippets(store: &SnippetStore, source: &str) -> Result<String, InlineError> {
    let roots = parse_directives(source);
    if roots.is_empty() {
        return Ok(source.to_string());
    }

    let graph = load_reachable(store, &roots)?;
    let order = topo_order(&graph, &roots)?;
    tracing::debug!(snippets = order.len(), "Snippets inlined");

    let mut out = String::new();
    out.push_str("// Snippets inlined by bunbox\n");
    for name in &order {
        out.push_str(&format!("// --- snippet: {} ---\n", name));
        let stripped = strip_exports(&graph[name].code);
        out.push_str(&stripped);
        if !stripped.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("// === USER CODE ===\n");
    out.push_str(source);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(snippets: &[(&str, &str)]) -> (tempfile::TempDir, SnippetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnippetStore::open(dir.path().to_path_buf()).unwrap();
        for (name, code) in snippets {
            store.save(name, code).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_parse_directives_order_and_dedup() {
        let source = "// @use-snippet: b\nlet x = 1;\n//@use-snippet : a\n// @use-snippet: b\n";
        assert_eq!(parse_directives(source), vec!["b", "a"]);
    }

    #[test]
    fn test_parse_directives_trailing_comment() {
        let source = "const x = 1; // @use-snippet: util";
        assert_eq!(parse_directives(source), vec!["util"]);
    }

    #[test]
    fn test_no_directives_passes_source_through() {
        let (_dir, store) = store_with(&[]);
        let source = "console.log(1);\n";
        assert_eq!(inline_snippets(&store, source).unwrap(), source);
    }

    #[test]
    fn test_strip_exports_rules() {
        assert_eq!(strip_exports("export async function f() {}"), "async function f() {}");
        assert_eq!(strip_exports("export function f() {}"), "function f() {}");
        assert_eq!(strip_exports("export const X = 1;"), "const X = 1;");
        assert_eq!(strip_exports("export let y = 2;"), "let y = 2;");
        assert_eq!(strip_exports("export abstract class A {}"), "abstract class A {}");
        assert_eq!(strip_exports("export class B {}"), "class B {}");
        assert_eq!(strip_exports("export default fn;"), "fn;");
        assert_eq!(strip_exports("export type T = string;"), "type T = string;");
        assert_eq!(strip_exports("export interface I {}"), "interface I {}");
        // indentation is preserved and non-exports are untouched
        assert_eq!(strip_exports("  export const Z = 3;"), "  const Z = 3;");
        assert_eq!(strip_exports("const keep = 'export const';"), "const keep = 'export const';");
    }

    #[test]
    fn test_inline_single_snippet() {
        let (_dir, store) = store_with(&[("util", "/** @description util */\nexport const X = 42;")]);
        let out = inline_snippets(&store, "// @use-snippet: util\nconsole.log(X);").unwrap();
        assert!(out.contains("// --- snippet: util ---"));
        assert!(out.contains("const X = 42;"));
        assert!(!out.contains("export const X"));
        assert!(out.contains("// === USER CODE ===\n// @use-snippet: util\nconsole.log(X);"));
    }

    #[test]
    fn test_dependencies_come_first() {
        let (_dir, store) = store_with(&[
            ("top", "/** @description top */\n// @use-snippet: base\nexport const T = B + 1;"),
            ("base", "/** @description base */\nexport const B = 1;"),
        ]);
        let out = inline_snippets(&store, "// @use-snippet: top\nconsole.log(T);").unwrap();
        let base_at = out.find("// --- snippet: base ---").unwrap();
        let top_at = out.find("// --- snippet: top ---").unwrap();
        assert!(base_at < top_at);
        // each snippet appears exactly once
        assert_eq!(out.matches("// --- snippet: base ---").count(), 1);
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        let (_dir, store) = store_with(&[
            ("a", "/** @description a */\n// @use-snippet: shared\nexport const A = S;"),
            ("b", "/** @description b */\n// @use-snippet: shared\nexport const B = S;"),
            ("shared", "/** @description shared */\nexport const S = 0;"),
        ]);
        let out =
            inline_snippets(&store, "// @use-snippet: a\n// @use-snippet: b\n").unwrap();
        assert_eq!(out.matches("// --- snippet: shared ---").count(), 1);
        let shared_at = out.find("// --- snippet: shared ---").unwrap();
        assert!(shared_at < out.find("// --- snippet: a ---").unwrap());
        assert!(shared_at < out.find("// --- snippet: b ---").unwrap());
    }

    #[test]
    fn test_missing_snippet_error() {
        let (_dir, store) = store_with(&[]);
        let err = inline_snippets(&store, "// @use-snippet: ghost\n").unwrap_err();
        assert_eq!(err.to_string(), "Snippet 'ghost' not found");
    }

    #[test]
    fn test_cycle_reports_chain() {
        let (_dir, store) = store_with(&[
            ("a", "/** @description a */\n// @use-snippet: b\nexport const A = 1;"),
            ("b", "/** @description b */\n// @use-snippet: a\nexport const B = 2;"),
        ]);
        let err = inline_snippets(&store, "// @use-snippet: a\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a → b → a"), "unexpected message: {message}");
    }

    #[test]
    fn test_self_cycle() {
        let (_dir, store) = store_with(&[(
            "loop",
            "/** @description loop */\n// @use-snippet: loop\nexport const L = 1;",
        )]);
        let err = inline_snippets(&store, "// @use-snippet: loop\n").unwrap_err();
        assert!(err.to_string().contains("loop → loop"));
    }
}
