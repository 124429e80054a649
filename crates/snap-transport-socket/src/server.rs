//! The inbound half: an Axum WebSocket server exposing one full-duplex
//! envelope channel per connection, with ping/pong liveness.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use snap_core::Envelope;
use snap_error::SnapError;
use snap_runtime::{is_stream_method, InboundHooks};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as TokioStreamExt;
use tracing::{info, warn};

/// Where a [`SocketServerTransport`] binds, which path it serves WebSocket
/// upgrades on, and how often it pings connected peers.
#[derive(Debug, Clone)]
pub struct SocketServerConfig {
    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,
    /// Path the WebSocket endpoint is served on, e.g. `"/snap/ws"`.
    pub path: String,
    /// How often the server sends a liveness ping to each connected peer.
    pub ping_interval: Duration,
}

impl SocketServerConfig {
    /// A server bound to `bind_addr`, serving the socket at `"/"` and
    /// pinging peers every 30 seconds.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            path: "/".to_string(),
            ping_interval: Duration::from_secs(30),
        }
    }

    /// Override the WebSocket endpoint's path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the ping interval.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

#[derive(Clone)]
struct AppState {
    hooks: Arc<dyn InboundHooks>,
    ping_interval: Duration,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Drive one full-duplex connection until the peer closes it, a malformed
/// frame arrives, or a ping goes unanswered for a full interval.
///
/// Per `spec.md` §4.10: the method carried by the first (and, in practice,
/// only) inbound envelope on a connection dictates whether the server emits
/// a single response frame or a sequence terminating with `type=response`.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut ticker = tokio::time::interval(state.ping_interval);
    ticker.tick().await; // first tick fires immediately; consume it
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if awaiting_pong {
                    warn!(target: "snap_transport_socket", "peer missed a liveness pong, closing");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Pong(_)) => {
                        awaiting_pong = false;
                    }
                    Ok(Message::Ping(payload)) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Text(text)) => {
                        if !dispatch_text(&text, &state, &mut sink).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(target: "snap_transport_socket", "binary frames are not part of the envelope protocol, ignoring");
                    }
                    Err(e) => {
                        warn!(target: "snap_transport_socket", error = %e, "socket read error, closing");
                        break;
                    }
                }
            }
        }
    }
}

/// Parse `text` as an envelope and run it through the appropriate inbound
/// pipeline, writing the resulting frame(s) to `sink`. Returns `false` if
/// the connection should be torn down (write failure).
async fn dispatch_text(
    text: &str,
    state: &AppState,
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> bool {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(target: "snap_transport_socket", error = %e, "malformed envelope frame");
            let payload = serde_json::json!({ "error": { "code": 1003, "message": e.to_string() } });
            return sink.send(Message::Text(payload.to_string())).await.is_ok();
        }
    };

    if is_stream_method(&envelope.method) {
        match state.hooks.process_stream(envelope).await {
            Ok(mut events) => {
                while let Some(event) = TokioStreamExt::next(&mut events).await {
                    let text = serde_json::to_string(&event).unwrap_or_default();
                    if sink.send(Message::Text(text)).await.is_err() {
                        return false;
                    }
                }
                true
            }
            Err(e) => send_error(sink, &e).await,
        }
    } else {
        match state.hooks.process_message(envelope).await {
            Ok(response) => {
                let text = serde_json::to_string(&response).unwrap_or_default();
                sink.send(Message::Text(text)).await.is_ok()
            }
            Err(e) => send_error(sink, &e).await,
        }
    }
}

async fn send_error(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    err: &SnapError,
) -> bool {
    warn!(target: "snap_transport_socket", code = %err.code, "request rejected");
    sink.send(Message::Text(err.to_payload().to_string())).await.is_ok()
}

fn build_router(hooks: Arc<dyn InboundHooks>, config: &SocketServerConfig) -> Router {
    Router::new().route(
        &config.path,
        get(ws_handler),
    ).with_state(AppState {
        hooks,
        ping_interval: config.ping_interval,
    })
}

/// The server side of the socket transport: binds one path to a WebSocket
/// upgrade handler, per `spec.md` §4.10.
pub struct SocketServerTransport {
    config: SocketServerConfig,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketServerTransport {
    /// Create a server transport for `config`. Does not bind until
    /// [`snap_runtime::Transport::start`] is called.
    #[must_use]
    pub fn new(config: SocketServerConfig) -> Self {
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
        let router = build_router(hooks, &self.config);
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| SnapError::new(snap_error::ErrorCode::TransportUnavailable, e.to_string()))?;
        let addr = self.config.bind_addr;
        info!(target: "snap_transport_socket", %addr, path = %self.config.path, "socket transport listening");

        let shutdown = Arc::clone(&self.shutdown);
        let join = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = result {
                warn!(target: "snap_transport_socket", error = %e, "socket server exited with an error");
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
