//! # kdash WebSocket server
//!
//! Exposes a [`TelemetryHub`] to dashboard clients over WebSocket. Every
//! connection becomes a subscriber: it receives snapshots, setup replies and
//! alerts as JSON text frames, and may send `setup`, `save` and `reset`
//! requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use kdash_core::telemetry::{ClientMessage, TelemetryHub};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Port the dashboard front-end connects to by default
pub const DEFAULT_PORT: u16 = 5678;

/// Longest a single frame may take to reach a client before it is dropped
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

struct ServerState {
    hub: TelemetryHub,
    send_timeout: Duration,
}

/// Builder for the WebSocket server
#[derive(Clone)]
pub struct WebSocketServerBuilder {
    listen: SocketAddr,
    hub: TelemetryHub,
    send_timeout: Duration,
}

impl WebSocketServerBuilder {
    /// Serve `hub` on `listen`
    pub fn new(listen: SocketAddr, hub: TelemetryHub) -> Self {
        Self {
            listen,
            hub,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override the per-frame send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Bind and start serving until `shutdown` is cancelled
    pub async fn spawn(self, shutdown: CancellationToken) -> anyhow::Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let address = listener.local_addr()?;
        info!(%address, "websocket server listening");

        let app = router(self.hub, self.send_timeout);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = server.await {
                warn!(error = %e, "websocket server exited with error");
            }
        });

        Ok(WebSocketServerHandle { address, task })
    }
}

/// Routes serving the WebSocket endpoint at `/` and `/ws`
pub fn router(hub: TelemetryHub, send_timeout: Duration) -> Router {
    let state = Arc::new(ServerState { hub, send_timeout });
    Router::new()
        .route("/", get(upgrade_handler))
        .route("/ws", get(upgrade_handler))
        .with_state(state)
}

/// Handle for the running server
pub struct WebSocketServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Bound listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Wait for the server to finish after shutdown was requested
    pub async fn join(self) -> anyhow::Result<()> {
        self.task.await.map_err(|e| anyhow::anyhow!(e))
    }
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: Arc<ServerState>) {
    let hub = &state.hub;
    let (id, mut outbound) = hub.subscribe();
    let (mut sink, mut stream) = socket.split();
    info!(client = %id, "client connected");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                // None means the registry dropped us
                let Some(message) = message else { break };
                let text = match serde_json::to_string(&*message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialise outbound message");
                        continue;
                    }
                };
                match tokio::time::timeout(state.send_timeout, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(client = %id, error = %e, "send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(client = %id, "client not reading, disconnecting");
                        break;
                    }
                }
            }
            incoming = stream.next() => {
                let Some(Ok(incoming)) = incoming else { break };
                match incoming {
                    Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(request) => {
                            if !hub.submit(id, request) {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(client = %id, error = %e, "invalid client message");
                            hub.reject(id, format!("invalid message: {e}"));
                        }
                    },
                    Message::Binary(_) => hub.reject(id, "binary messages are not supported"),
                    Message::Ping(payload) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    hub.unsubscribe(id);
    info!(client = %id, "client disconnected");
}
