//! In-process interposition layer loaded ahead of user code.
//!
//! The preamble is JavaScript preloaded into the Bun runtime before the
//! user program. It routes `fetch` through the permission proxy, stubs
//! out filesystem and spawn primitives, and narrows `process.env` to
//! the allowlist. It is an advisory layer: it keeps honest code honest
//! and gives the permission model a uniform surface. It is not a
//! defence against an adversary; the container backend exists for that.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// File name the preamble is written under in the execution directory.
pub const PREAMBLE_FILE: &str = "preamble.js";

/// Ambient variable carrying the proxy base URL into the child runtime.
pub const PROXY_URL_VAR: &str = "PROXY_URL";

/// Ambient variable carrying the comma-separated env allowlist.
pub const ALLOWED_ENV_VARS_VAR: &str = "ALLOWED_ENV_VARS";

pub const PREAMBLE_JS: &str = r##"// bunbox sandbox preamble. Preloaded before user code: routes fetch
// through the permission proxy, disables ambient-authority APIs, and
// narrows process.env to the allowlist.
const PROXY_URL = process.env.PROXY_URL || "http://127.0.0.1:8790";
const ALLOWED = (process.env.ALLOWED_ENV_VARS || "")
  .split(",")
  .map((s) => s.trim())
  .filter((s) => s.length > 0);

const realFetch = globalThis.fetch;

// Values must be captured before process.env is replaced below.
const cachedEnv = {};
for (const name of ALLOWED) {
  if (process.env[name] !== undefined) cachedEnv[name] = process.env[name];
}

function normalizeRequest(input, init) {
  let url;
  let method;
  const headers = {};
  let body;
  if (typeof input === "object" && input !== null && typeof input.url === "string") {
    // Request object
    url = input.url;
    method = (init && init.method) || input.method || "GET";
    if (input.headers && typeof input.headers.forEach === "function") {
      input.headers.forEach((value, key) => {
        headers[key] = value;
      });
    }
  } else {
    url = String(input);
    method = (init && init.method) || "GET";
  }
  const initHeaders = init && init.headers;
  if (initHeaders) {
    if (typeof initHeaders.forEach === "function") {
      initHeaders.forEach((value, key) => {
        headers[key] = value;
      });
    } else if (Array.isArray(initHeaders)) {
      for (const [key, value] of initHeaders) headers[key] = value;
    } else {
      Object.assign(headers, initHeaders);
    }
  }
  if (init && init.body !== undefined && init.body !== null) {
    body = typeof init.body === "string" ? init.body : String(init.body);
  }
  return { url, method, headers, body };
}

globalThis.fetch = async function proxiedFetch(input, init) {
  const described = normalizeRequest(input, init);
  const proxied = await realFetch(PROXY_URL + "/proxy", {
    method: "POST",
    headers: { "content-type": "application/json" },
    body: JSON.stringify(described),
  });
  if (proxied.status === 403) {
    const denial = await proxied.json();
    // Emitted before the process can exit so the executor can attribute
    // the failure to this denial.
    console.error(JSON.stringify(denial));
    const error = new Error(
      "PERMISSION_DENIED: " + described.method + " " + described.url
    );
    error.code = "PERMISSION_DENIED";
    error.denial = denial;
    throw error;
  }
  const payload = await proxied.json();
  return new Response(payload.body, {
    status: payload.status,
    statusText: payload.statusText,
    headers: payload.headers,
  });
};

function blocked(name) {
  return function () {
    throw new Error(name + " is disabled in the bunbox sandbox");
  };
}

if (typeof Bun !== "undefined") {
  Bun.file = blocked("Bun.file");
  Bun.write = blocked("Bun.write");
  Bun.spawn = blocked("Bun.spawn");
  Bun.spawnSync = blocked("Bun.spawnSync");
}

process.env = new Proxy(cachedEnv, {
  get(target, prop) {
    if (typeof prop !== "string") return undefined;
    if (prop in target) return target[prop];
    throw new Error(
      "Access to environment variable '" +
        prop +
        "' is blocked. Allowed: " +
        (ALLOWED.length > 0 ? ALLOWED.join(", ") : "(none)")
    );
  },
  has(target, prop) {
    return typeof prop === "string" && prop in target;
  },
  set() {
    return true;
  },
});
"##;

/// Write the preamble into `dir`, returning its path.
pub fn write_preamble(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(PREAMBLE_FILE);
    std::fs::write(&path, PREAMBLE_JS)?;
    Ok(path)
}

/// Environment handed to the sandboxed child: proxy location, allowlist
/// names, and the allowlisted values themselves (the preamble caches
/// the values before it replaces `process.env`).
pub fn sandbox_env(
    proxy_url: &str,
    allowed: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let names: Vec<&str> = allowed.keys().map(String::as_str).collect();
    let mut vars = vec![
        (PROXY_URL_VAR.to_string(), proxy_url.to_string()),
        (ALLOWED_ENV_VARS_VAR.to_string(), names.join(",")),
    ];
    for (name, value) in allowed {
        vars.push((name.clone(), value.clone()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_preamble(dir.path()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, PREAMBLE_JS);
        assert_eq!(path.file_name().unwrap(), PREAMBLE_FILE);
    }

    #[test]
    fn test_sandbox_env_carries_allowlist_and_values() {
        let mut allowed = BTreeMap::new();
        allowed.insert("API_KEY".to_string(), "abc".to_string());
        allowed.insert("TOKEN".to_string(), "t".to_string());

        let vars = sandbox_env("http://127.0.0.1:8790", &allowed);
        let lookup = |key: &str| {
            vars.iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };
        assert_eq!(lookup(PROXY_URL_VAR), Some("http://127.0.0.1:8790"));
        assert_eq!(lookup(ALLOWED_ENV_VARS_VAR), Some("API_KEY,TOKEN"));
        assert_eq!(lookup("API_KEY"), Some("abc"));
        assert_eq!(lookup("TOKEN"), Some("t"));
    }

    #[test]
    fn test_sandbox_env_empty_allowlist() {
        let vars = sandbox_env("http://127.0.0.1:0", &BTreeMap::new());
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[1].1, "");
    }
}
