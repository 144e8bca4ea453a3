//! Process-wide mutable set of granted capabilities.

use std::sync::{Arc, RwLock};

use super::matcher::match_permission;
use super::model::Capability;

/// Shared handle to the set of granted capabilities.
///
/// Cloning is cheap and every clone sees the same underlying set; the
/// permission proxy and the control surface each hold one. Locks are
/// taken only long enough to copy or mutate: `check` matches against a
/// snapshot so no lock is held across the matching work.
#[derive(Clone, Default)]
pub struct PermissionStore {
    inner: Arc<RwLock<Vec<Capability>>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a grant. Duplicates are permitted and indistinguishable.
    pub fn grant(&self, capability: Capability) {
        self.inner
            .write()
            .expect("permission store lock")
            .push(capability);
    }

    /// Remove every grant structurally equal to `capability`.
    /// Returns whether any was removed.
    pub fn revoke(&self, capability: &Capability) -> bool {
        let mut grants = self.inner.write().expect("permission store lock");
        let before = grants.len();
        grants.retain(|granted| !granted.same_grant(capability));
        grants.len() != before
    }

    /// Whether some grant in the current snapshot covers `required`.
    pub fn check(&self, required: &Capability) -> bool {
        let snapshot = self.inner.read().expect("permission store lock").clone();
        snapshot
            .iter()
            .any(|granted| match_permission(required, granted))
    }

    /// Snapshot of all grants, in grant order.
    pub fn list(&self) -> Vec<Capability> {
        self.inner.read().expect("permission store lock").clone()
    }

    /// Drop every grant.
    pub fn clear(&self) {
        self.inner.write().expect("permission store lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::model::HttpMethod;

    fn http_grant(host: &str, path: &str) -> Capability {
        Capability::Http {
            host: host.to_string(),
            path_pattern: Some(path.to_string()),
            methods: vec![HttpMethod::Get],
            description: "test".to_string(),
        }
    }

    #[test]
    fn test_grant_then_check() {
        let store = PermissionStore::new();
        let required = http_grant("httpbin.org", "/get");
        assert!(!store.check(&required));
        store.grant(http_grant("httpbin.org", "*"));
        assert!(store.check(&required));
    }

    #[test]
    fn test_revoke_sole_match_turns_check_false() {
        let store = PermissionStore::new();
        let grant = http_grant("httpbin.org", "*");
        store.grant(grant.clone());
        assert!(store.check(&http_grant("httpbin.org", "/get")));
        assert!(store.revoke(&grant));
        assert!(!store.check(&http_grant("httpbin.org", "/get")));
    }

    #[test]
    fn test_revoke_removes_all_structural_duplicates() {
        let store = PermissionStore::new();
        let grant = http_grant("example.com", "/api/*");
        store.grant(grant.clone());
        store.grant(grant.clone());
        store.grant(http_grant("other.com", "*"));
        assert_eq!(store.list().len(), 3);
        assert!(store.revoke(&grant));
        assert_eq!(store.list().len(), 1);
        // a second revoke finds nothing
        assert!(!store.revoke(&grant));
    }

    #[test]
    fn test_grant_then_revoke_restores_list() {
        let store = PermissionStore::new();
        store.grant(http_grant("a.com", "*"));
        let before = store.list();
        let extra = http_grant("b.com", "/x");
        store.grant(extra.clone());
        store.revoke(&extra);
        let after = store.list();
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(after.iter()).all(|(a, b)| a.same_grant(b)));
    }

    #[test]
    fn test_clear() {
        let store = PermissionStore::new();
        store.grant(http_grant("a.com", "*"));
        store.grant(http_grant("b.com", "*"));
        store.clear();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let store = PermissionStore::new();
        let other = store.clone();
        store.grant(http_grant("a.com", "*"));
        assert_eq!(other.list().len(), 1);
    }
}
