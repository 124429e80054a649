//! The inbound half: an Axum server exposing one envelope endpoint and the
//! well-known card document.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use snap_core::Envelope;
use snap_error::SnapError;
use snap_runtime::InboundHooks;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Where an [`HttpServerTransport`] binds and which path it serves envelopes
/// on.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,
    /// Path the envelope endpoint is served on, e.g. `"/snap"`.
    pub path: String,
}

impl HttpServerConfig {
    /// A server bound to `bind_addr`, serving envelopes at `"/"`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            path: "/".to_string(),
        }
    }

    /// Override the envelope endpoint's path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[derive(Clone)]
struct AppState {
    hooks: Arc<dyn InboundHooks>,
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

fn error_response(err: &SnapError) -> Response {
    let status = StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!(target: "snap_transport_http", code = %err.code, %status, "request rejected");
    (status, Json(err.to_payload())).into_response()
}

async fn handle_envelope(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            // Malformed JSON is a client error at the HTTP layer itself,
            // before any SNAP-level error code applies, and is deliberately
            // not logged (spec.md §4.9).
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response();
        }
    };

    if wants_event_stream(&headers) {
        return match state.hooks.process_stream(envelope).await {
            Ok(stream) => {
                let sse_stream = stream.map(|env| {
                    let data = serde_json::to_string(&env).unwrap_or_default();
                    Ok::<_, Infallible>(SseEvent::default().data(data))
                });
                Sse::new(sse_stream).into_response()
            }
            Err(e) => error_response(&e),
        };
    }

    match state.hooks.process_message(envelope).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn well_known_card(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hooks.signed_card().await)
}

fn build_router(hooks: Arc<dyn InboundHooks>, path: &str) -> Router {
    Router::new()
        .route(path, post(handle_envelope))
        .route("/.well-known/snap-agent.json", get(well_known_card))
        .layer(CorsLayer::permissive())
        .with_state(AppState { hooks })
}

/// The server side of the HTTP transport: binds one path for envelope
/// request/response (and SSE streaming), plus `/.well-known/snap-agent.json`
/// with permissive CORS, per `spec.md` §4.9.
pub struct HttpServerTransport {
    config: HttpServerConfig,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpServerTransport {
    /// Create a server transport for `config`. Does not bind until
    /// [`snap_runtime::Transport::start`] is called.
    #[must_use]
    pub fn new(config: HttpServerConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub(crate) async fn bind(&self, hooks: Arc<dyn InboundHooks>) -> Result<(), SnapError> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let router = build_router(hooks, &self.config.path);
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| SnapError::new(snap_error::ErrorCode::TransportUnavailable, e.to_string()))?;
        let addr = self.config.bind_addr;
        info!(target: "snap_transport_http", %addr, path = %self.config.path, "http transport listening");

        let shutdown = Arc::clone(&self.shutdown);
        let join = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = result {
                warn!(target: "snap_transport_http", error = %e, "http server exited with an error");
            }
        });
        *guard = Some(join);
        Ok(())
    }

    pub(crate) async fn unbind(&self) -> Result<(), SnapError> {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}
