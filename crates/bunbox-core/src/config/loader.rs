//! Environment variable loading helpers.
//!
//! Centralises the read-with-default logic so business code never
//! repeats `env::var(..).ok().filter(..).unwrap_or_else(..)` chains.

use std::env;

/// Read an environment variable, falling back to `default` when it is
/// unset or empty.
pub fn env_or<F>(key: &str, default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(default)
}

/// Read an environment variable, treating empty values as unset.
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

/// Parse a boolean environment variable: 0/false/no/off are false,
/// anything else set is true.
pub fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => !matches!(
            value.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        Err(_) => default,
    }
}

/// Parse a numeric environment variable, ignoring unparseable values.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_optional(key).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default_on_missing() {
        assert_eq!(
            env_or("BUNBOX_TEST_DEFINITELY_UNSET", || "fallback".to_string()),
            "fallback"
        );
    }

    #[test]
    fn test_env_bool_default() {
        assert!(env_bool("BUNBOX_TEST_DEFINITELY_UNSET", true));
        assert!(!env_bool("BUNBOX_TEST_DEFINITELY_UNSET", false));
    }

    #[test]
    fn test_env_parse_missing() {
        assert_eq!(env_parse::<u64>("BUNBOX_TEST_DEFINITELY_UNSET"), None);
    }
}
