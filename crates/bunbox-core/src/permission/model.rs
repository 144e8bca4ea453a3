//! Capability data model.
//!
//! A capability is an immutable record describing a class of permitted
//! actions (HTTP, file, env). The matcher in [`super::matcher`] decides
//! whether a granted capability covers a required one; structural
//! equality ([`Capability::same_grant`]) is what revocation uses.

use serde::{Deserialize, Serialize};

/// HTTP verbs the broker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Coerce a wire string into a known verb. Unknown verbs become GET.
    pub fn coerce(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            _ => Self::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

/// File operations a file capability can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
}

/// An immutable record describing a class of permitted actions.
///
/// Serialised with a `type` tag (`http` / `file` / `env`) and camelCase
/// fields; this is the wire shape shared by the control surface, the
/// permission proxy, and the denial records parsed out of sandbox stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Capability {
    #[serde(rename_all = "camelCase")]
    Http {
        /// Hostname, matched by exact string equality (case as given).
        host: String,
        /// Optional path pattern; `*` matches any run of non-`/` characters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_pattern: Option<String>,
        /// Permitted verbs. Empty (or missing) means all verbs.
        #[serde(default)]
        methods: Vec<HttpMethod>,
        /// Human-readable reason for the grant.
        description: String,
    },
    #[serde(rename_all = "camelCase")]
    File {
        /// Path pattern; `*` matches any run of non-`/` characters.
        path: String,
        /// Permitted operations.
        operations: Vec<FileOperation>,
        description: String,
    },
    #[serde(rename_all = "camelCase")]
    Env {
        /// Variable name patterns; `*` matches any run of characters.
        variables: Vec<String>,
        description: String,
    },
}

impl Capability {
    /// The `type` tag this capability serialises with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::File { .. } => "file",
            Self::Env { .. } => "env",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Http { description, .. }
            | Self::File { description, .. }
            | Self::Env { description, .. } => description,
        }
    }

    /// Structural equality used by revocation: same kind, all scalar
    /// fields equal, and the method / operation / variable lists equal as
    /// multisets (order-independent).
    pub fn same_grant(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Http {
                    host: ah,
                    path_pattern: ap,
                    methods: am,
                    description: ad,
                },
                Self::Http {
                    host: bh,
                    path_pattern: bp,
                    methods: bm,
                    description: bd,
                },
            ) => ah == bh && ap == bp && ad == bd && same_multiset(am, bm),
            (
                Self::File {
                    path: ap,
                    operations: ao,
                    description: ad,
                },
                Self::File {
                    path: bp,
                    operations: bo,
                    description: bd,
                },
            ) => ap == bp && ad == bd && same_multiset(ao, bo),
            (
                Self::Env {
                    variables: av,
                    description: ad,
                },
                Self::Env {
                    variables: bv,
                    description: bd,
                },
            ) => ad == bd && same_multiset(av, bv),
            _ => false,
        }
    }
}

fn same_multiset<T: Ord + Clone>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(host: &str, path: Option<&str>, methods: Vec<HttpMethod>) -> Capability {
        Capability::Http {
            host: host.to_string(),
            path_pattern: path.map(String::from),
            methods,
            description: "test".to_string(),
        }
    }

    #[test]
    fn test_method_coercion() {
        assert_eq!(HttpMethod::coerce("get"), HttpMethod::Get);
        assert_eq!(HttpMethod::coerce("POST"), HttpMethod::Post);
        assert_eq!(HttpMethod::coerce("Patch"), HttpMethod::Patch);
        // Unknown verbs fall back to GET
        assert_eq!(HttpMethod::coerce("TRACE"), HttpMethod::Get);
        assert_eq!(HttpMethod::coerce(""), HttpMethod::Get);
    }

    #[test]
    fn test_same_grant_ignores_method_order() {
        let a = http("api.example.com", Some("/v1/*"), vec![HttpMethod::Get, HttpMethod::Post]);
        let b = http("api.example.com", Some("/v1/*"), vec![HttpMethod::Post, HttpMethod::Get]);
        assert!(a.same_grant(&b));
    }

    #[test]
    fn test_same_grant_respects_multiset() {
        let a = http("h", None, vec![HttpMethod::Get, HttpMethod::Get]);
        let b = http("h", None, vec![HttpMethod::Get]);
        assert!(!a.same_grant(&b));
    }

    #[test]
    fn test_same_grant_different_kinds() {
        let a = http("h", None, vec![]);
        let b = Capability::Env {
            variables: vec!["X".to_string()],
            description: "test".to_string(),
        };
        assert!(!a.same_grant(&b));
    }

    #[test]
    fn test_serde_wire_shape() {
        let cap = http("httpbin.org", Some("/get"), vec![HttpMethod::Get]);
        let value = serde_json::to_value(&cap).unwrap();
        assert_eq!(value["type"], "http");
        assert_eq!(value["host"], "httpbin.org");
        assert_eq!(value["pathPattern"], "/get");
        assert_eq!(value["methods"][0], "GET");
    }

    #[test]
    fn test_missing_methods_deserialises_as_empty() {
        let cap: Capability = serde_json::from_str(
            r#"{"type":"http","host":"example.com","description":"x"}"#,
        )
        .unwrap();
        match cap {
            Capability::Http { methods, path_pattern, .. } => {
                assert!(methods.is_empty());
                assert!(path_pattern.is_none());
            }
            _ => panic!("expected http capability"),
        }
    }

    #[test]
    fn test_env_capability_roundtrip() {
        let cap = Capability::Env {
            variables: vec!["SECRET_*".to_string(), "API_KEY".to_string()],
            description: "secrets".to_string(),
        };
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert!(cap.same_grant(&back));
    }
}
