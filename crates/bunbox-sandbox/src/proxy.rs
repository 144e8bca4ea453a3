//! Permission proxy: the local HTTP intermediary between sandboxed code
//! and the network.
//!
//! Every outbound request from user code arrives as a described request
//! (`POST /proxy`). The proxy derives the HTTP capability the request
//! requires, consults the shared permission store, and either forwards
//! the request upstream or answers 403 with a machine-readable denial
//! the sandbox preamble re-emits on stderr.
//!
//! The proxy binds loopback only; it is an authority boundary, not a
//! public endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::TcpListener;
use std::thread;

use anyhow::{Context, Result};
use bunbox_core::observability;
use bunbox_core::permission::{Capability, HttpMethod, PermissionStore};
use bunbox_core::protocol::{AttemptedAction, PermissionDenied};

#[derive(Clone)]
struct AppState {
    store: PermissionStore,
    client: reqwest::Client,
}

/// Body of `POST /proxy`: one described outbound request.
#[derive(Debug, Deserialize)]
struct OutboundRequest {
    url: String,
    method: String,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
}

/// Build the proxy router over a shared permission store.
pub fn router(store: PermissionStore) -> Router {
    let state = AppState {
        store,
        client: reqwest::Client::new(),
    };
    Router::new()
        .route("/proxy", post(handle_proxy))
        .route("/grant", post(handle_grant))
        .route("/revoke", post(handle_revoke))
        .route("/permissions", get(handle_permissions))
        .route("/clear", post(handle_clear))
        .route("/health", get(handle_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// The capability a described request requires: host from the URL's
/// hostname, path pattern from its literal path, single coerced method.
fn required_capability(url: &reqwest::Url, method: &str) -> Capability {
    let verb = HttpMethod::coerce(method);
    Capability::Http {
        host: url.host_str().unwrap_or_default().to_string(),
        path_pattern: Some(url.path().to_string()),
        methods: vec![verb],
        description: format!("{} {}", verb.as_str(), url),
    }
}

async fn handle_proxy(
    State(state): State<AppState>,
    Json(request): Json<OutboundRequest>,
) -> Response {
    let url = match reqwest::Url::parse(&request.url) {
        Ok(url) => url,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_url", "message": e.to_string()})),
            )
                .into_response();
        }
    };

    let required = required_capability(&url, &request.method);
    if !state.store.check(&required) {
        let attempted = AttemptedAction {
            kind: "http_request".to_string(),
            details: json!({"url": request.url, "method": request.method}),
        };
        let denial = PermissionDenied::new(required, attempted);
        observability::security_permission_denied("http", &request.url, &denial.request_id);
        return (StatusCode::FORBIDDEN, Json(denial)).into_response();
    }

    let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut outbound = state.client.request(method, url);
    if let Some(headers) = &request.headers {
        for (name, value) in headers {
            outbound = outbound.header(name, value);
        }
    }
    if let Some(body) = &request.body {
        outbound = outbound.body(body.clone());
    }

    match outbound.send().await {
        Ok(response) => {
            let status = response.status();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
                })
                .collect();
            let body = response.text().await.unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "status": status.as_u16(),
                    "statusText": status.canonical_reason().unwrap_or(""),
                    "headers": headers,
                    "body": body,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(url = %request.url, error = %e, "Upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "upstream_request_failed", "message": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn handle_grant(
    State(state): State<AppState>,
    Json(capability): Json<Capability>,
) -> impl IntoResponse {
    tracing::info!(kind = %capability.kind(), "Permission granted");
    state.store.grant(capability);
    Json(json!({"success": true}))
}

async fn handle_revoke(
    State(state): State<AppState>,
    Json(capability): Json<Capability>,
) -> impl IntoResponse {
    let removed = state.store.revoke(&capability);
    Json(json!({"removed": removed}))
}

async fn handle_permissions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"permissions": state.store.list()}))
}

async fn handle_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.store.clear();
    Json(json!({"success": true}))
}

/// Handle to a running proxy. The server lives on its own thread with a
/// dedicated runtime; `shutdown` stops it gracefully and joins.
pub struct ProxyHandle {
    port: u16,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ProxyHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Stop the server and join its thread.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Start the permission proxy on `127.0.0.1:port` (loopback only; pass
/// port 0 to let the OS pick one).
pub fn start(store: PermissionStore, port: u16) -> Result<ProxyHandle> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .with_context(|| format!("failed to bind permission proxy on 127.0.0.1:{}", port))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure proxy listener")?;
    let bound_port = listener.local_addr().context("proxy listener address")?.port();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let app = router(store);

    let thread = thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build proxy runtime");
                return;
            }
        };
        runtime.block_on(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to adopt proxy listener");
                    return;
                }
            };
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "Permission proxy exited with error");
            }
        });
    });

    tracing::info!(port = bound_port, "Permission proxy listening on 127.0.0.1");
    Ok(ProxyHandle {
        port: bound_port,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}
