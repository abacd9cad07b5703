//! Echo server core: connection registry, WebSocket handler and broadcast.
//!
//! Each accepted connection gets an id and a writer task fed by an unbounded
//! channel. A frame read from any connection is queued on every registered
//! channel (or every channel but the sender's, when `notify_self` is off).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

/// Default maximum frame size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Shared server state holding the connection registry.
pub struct EchoState {
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_id: AtomicU64,
    /// Frames larger than this are dropped.
    max_payload_size: usize,
    /// Whether the sender receives its own frames back.
    notify_self: bool,
}

impl Default for EchoState {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoState {
    /// State with default limits, echoing to the sender too.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, true)
    }

    #[must_use]
    pub fn with_config(max_payload_size: usize, notify_self: bool) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_payload_size,
            notify_self,
        }
    }

    async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    async fn unregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queue `msg` for every connection, skipping `from` unless
    /// `notify_self` is set. Returns how many connections it was queued for.
    async fn broadcast(&self, from: u64, msg: &Message) -> usize {
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for (id, sender) in conns.iter() {
            if *id == from && !self.notify_self {
                continue;
            }
            if sender.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Clients see an orderly remote close. Useful for graceful shutdown and
    /// for testing reconnect paths.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(conn = id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<EchoState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.register(tx).await;
    tracing::info!(conn, "connection opened");

    // Writer: channel -> socket. A Close frame ends the connection.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader: socket -> broadcast.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let len = match &msg {
                Message::Text(text) => text.len(),
                Message::Binary(data) => data.len(),
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if len > reader_state.max_payload_size {
                tracing::warn!(
                    conn,
                    size = len,
                    max = reader_state.max_payload_size,
                    "frame exceeds size limit, dropped"
                );
                continue;
            }
            let delivered = reader_state.broadcast(conn, &msg).await;
            tracing::debug!(conn, len, delivered, "frame broadcast");
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn).await;
    tracing::info!(conn, "connection closed");
}

/// Starts the echo server on `addr` with default state.
///
/// Returns the bound address (useful with port 0) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(EchoState::new())).await
}

/// Starts the echo server with a pre-configured [`EchoState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<EchoState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "echo server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<EchoState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
