//! The "granted covers required" matching algebra.
//!
//! Path matching is one-way: the granted side is evaluated as the
//! pattern against the required side's literal. The permission proxy
//! formulates required capabilities with fully literal URL paths, so
//! grants can be broader than any single request.

use regex::Regex;

use super::model::Capability;

/// Compile a glob-like pattern where `*` is the only metacharacter.
/// Everything else is matched literally; the expression is anchored at
/// both ends.
fn glob_regex(pattern: &str, star: &str) -> Regex {
    let parts: Vec<String> = pattern.split('*').map(|p| regex::escape(p)).collect();
    let source = format!("^{}$", parts.join(star));
    Regex::new(&source).expect("escaped glob pattern compiles")
}

/// Match a path pattern against a literal path.
/// `*` matches any run of characters excluding `/`.
pub fn match_path(pattern: &str, path: &str) -> bool {
    glob_regex(pattern, "[^/]*").is_match(path)
}

/// Match an env-var pattern against a literal variable name.
/// `*` matches any run of characters.
pub fn match_env_var(pattern: &str, name: &str) -> bool {
    glob_regex(pattern, ".*").is_match(name)
}

/// Whether `granted` covers `required`.
///
/// Deterministic and a pure function of the two records' fields.
pub fn match_permission(required: &Capability, granted: &Capability) -> bool {
    match (required, granted) {
        (
            Capability::Http {
                host: req_host,
                path_pattern: req_path,
                methods: req_methods,
                ..
            },
            Capability::Http {
                host: granted_host,
                path_pattern: granted_path,
                methods: granted_methods,
                ..
            },
        ) => {
            if req_host != granted_host {
                return false;
            }
            if let (Some(rp), Some(gp)) = (req_path, granted_path) {
                // granted must be at least as general as required
                if rp != gp && gp != "*" && !match_path(gp, rp) {
                    return false;
                }
            }
            // empty granted methods mean "all methods"
            if !req_methods.is_empty()
                && !granted_methods.is_empty()
                && !req_methods.iter().all(|m| granted_methods.contains(m))
            {
                return false;
            }
            true
        }
        (
            Capability::File {
                path: req_path,
                operations: req_ops,
                ..
            },
            Capability::File {
                path: granted_path,
                operations: granted_ops,
                ..
            },
        ) => {
            match_path(granted_path, req_path)
                && req_ops.iter().all(|op| granted_ops.contains(op))
        }
        (
            Capability::Env {
                variables: req_vars, ..
            },
            Capability::Env {
                variables: granted_vars,
                ..
            },
        ) => req_vars
            .iter()
            .all(|var| granted_vars.iter().any(|pat| match_env_var(pat, var))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::model::{FileOperation, HttpMethod};

    fn http(host: &str, path: Option<&str>, methods: Vec<HttpMethod>) -> Capability {
        Capability::Http {
            host: host.to_string(),
            path_pattern: path.map(String::from),
            methods,
            description: "test".to_string(),
        }
    }

    #[test]
    fn test_match_path_star_excludes_slash() {
        assert!(!match_path("/a/*", "/a/b/c"));
        assert!(match_path("/a/*", "/a/b"));
        assert!(match_path("/a/*/c", "/a/b/c"));
        assert!(match_path("/get", "/get"));
        assert!(!match_path("/get", "/post"));
    }

    #[test]
    fn test_match_path_escapes_regex_metacharacters() {
        assert!(match_path("/v1.0/items", "/v1.0/items"));
        // `.` is literal, not "any character"
        assert!(!match_path("/v1.0/items", "/v1x0/items"));
        assert!(match_path("/a+b/*", "/a+b/c"));
    }

    #[test]
    fn test_match_env_var_star_spans_everything() {
        assert!(match_env_var("SECRET_*", "SECRET_API_KEY"));
        assert!(match_env_var("SECRET_*", "SECRET_"));
        assert!(match_env_var("*", "ANYTHING"));
        assert!(!match_env_var("SECRET_*", "PUBLIC_KEY"));
    }

    #[test]
    fn test_match_env_var_prefix_without_underscore_tail() {
        // "SECRET_*" does not match the bare prefixless name, but
        // "SECRET*" does
        assert!(!match_env_var("SECRET_*", "SECRET"));
        assert!(match_env_var("SECRET*", "SECRET"));
    }

    #[test]
    fn test_http_hosts_must_be_equal() {
        let required = http("httpbin.org", Some("/get"), vec![HttpMethod::Get]);
        let granted = http("example.com", Some("*"), vec![HttpMethod::Get]);
        assert!(!match_permission(&required, &granted));
    }

    #[test]
    fn test_http_granted_path_covers_required_literal() {
        let required = http("httpbin.org", Some("/get"), vec![HttpMethod::Get]);
        assert!(match_permission(&required, &http("httpbin.org", Some("*"), vec![])));
        assert!(match_permission(&required, &http("httpbin.org", Some("/get"), vec![])));
        assert!(match_permission(&required, &http("httpbin.org", Some("/g*"), vec![])));
        assert!(!match_permission(&required, &http("httpbin.org", Some("/post"), vec![])));

        // one-way: a broad required pattern is not covered by a narrow grant
        let broad_required = http("httpbin.org", Some("*"), vec![]);
        assert!(!match_permission(&broad_required, &http("httpbin.org", Some("/get"), vec![])));
    }

    #[test]
    fn test_http_missing_path_on_either_side_is_unconstrained() {
        let required = http("httpbin.org", None, vec![HttpMethod::Get]);
        let granted = http("httpbin.org", Some("/narrow"), vec![]);
        assert!(match_permission(&required, &granted));

        let required = http("httpbin.org", Some("/get"), vec![]);
        let granted = http("httpbin.org", None, vec![]);
        assert!(match_permission(&required, &granted));
    }

    #[test]
    fn test_http_empty_granted_methods_mean_all() {
        let required = http("h", Some("/p"), vec![HttpMethod::Delete]);
        assert!(match_permission(&required, &http("h", Some("/p"), vec![])));
        assert!(!match_permission(
            &required,
            &http("h", Some("/p"), vec![HttpMethod::Get])
        ));
        assert!(match_permission(
            &required,
            &http("h", Some("/p"), vec![HttpMethod::Get, HttpMethod::Delete])
        ));
    }

    #[test]
    fn test_file_operations_must_be_subset() {
        let required = Capability::File {
            path: "/data/out.txt".to_string(),
            operations: vec![FileOperation::Read, FileOperation::Write],
            description: "test".to_string(),
        };
        let read_only = Capability::File {
            path: "/data/*".to_string(),
            operations: vec![FileOperation::Read],
            description: "test".to_string(),
        };
        let read_write = Capability::File {
            path: "/data/*".to_string(),
            operations: vec![FileOperation::Write, FileOperation::Read],
            description: "test".to_string(),
        };
        assert!(!match_permission(&required, &read_only));
        assert!(match_permission(&required, &read_write));
    }

    #[test]
    fn test_env_every_required_variable_needs_a_pattern() {
        let required = Capability::Env {
            variables: vec!["API_KEY".to_string(), "SECRET_TOKEN".to_string()],
            description: "test".to_string(),
        };
        let partial = Capability::Env {
            variables: vec!["API_*".to_string()],
            description: "test".to_string(),
        };
        let full = Capability::Env {
            variables: vec!["API_*".to_string(), "SECRET_*".to_string()],
            description: "test".to_string(),
        };
        assert!(!match_permission(&required, &partial));
        assert!(match_permission(&required, &full));
    }

    #[test]
    fn test_kinds_never_cross_match() {
        let required = http("h", None, vec![]);
        let granted = Capability::Env {
            variables: vec!["*".to_string()],
            description: "test".to_string(),
        };
        assert!(!match_permission(&required, &granted));
    }
}
