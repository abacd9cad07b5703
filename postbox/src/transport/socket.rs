//! WebSocket transport.
//!
//! Implements the [`Transport`] trait over a single WebSocket connection to a
//! fixed endpoint. Payloads are opaque UTF-8 text frames; there is no framing
//! or acknowledgement beyond what WebSocket itself provides.
//!
//! A background reader task forwards received frames into the session's
//! bounded incoming channel. When the channel is full the reader waits for
//! the consumer, which in turn stops reading from the socket: backpressure
//! instead of dropping.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::session::{ConnectStart, Session};
use super::{
    ConnectionState, DEFAULT_INCOMING_BUFFER, IncomingStream, Transport, TransportError,
    TransportMode, TransportType,
};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters for a [`SocketTransport`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Maximum time for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Incoming payloads buffered before the read loop waits.
    pub incoming_buffer: usize,
}

impl SocketConfig {
    /// Config for `url` with default timeout and buffer.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: CONNECT_TIMEOUT,
            incoming_buffer: DEFAULT_INCOMING_BUFFER,
        }
    }
}

/// WebSocket transport implementing the [`Transport`] trait.
///
/// Created disconnected; call [`Transport::connect`] to open the socket.
pub struct SocketTransport {
    config: SocketConfig,
    session: Arc<Session>,
    /// Write half of the live connection, if any.
    ws_sender: Mutex<Option<WsSender>>,
    /// Reader task of the live connection, if any.
    reader: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SocketTransport {
    /// Create a disconnected transport for the given endpoint.
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        let session = Arc::new(Session::new(config.incoming_buffer));
        Self {
            config,
            session,
            ws_sender: Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
        }
    }

    /// Return the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn shutdown_connection(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        let sink = self.ws_sender.lock().await.take();
        if let Some(mut sink) = sink
            && let Err(e) = sink.close().await
        {
            tracing::debug!(err = %e, "error closing WebSocket");
        }
    }
}

impl Transport for SocketTransport {
    /// Open the WebSocket connection.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake exceeds the timeout.
    /// - [`TransportError::Unreachable`] if the endpoint refuses the connection.
    /// - [`TransportError::Io`] for other I/O, TLS or HTTP failures.
    /// - [`TransportError::ConnectionClosed`] if `close` ran mid-handshake.
    async fn connect(&self) -> Result<(), TransportError> {
        let generation = match self.session.begin_connect() {
            ConnectStart::Proceed(generation) => generation,
            ConnectStart::AlreadyConnected | ConnectStart::InProgress => return Ok(()),
            ConnectStart::Offline => {
                tracing::debug!("simulated offline, not connecting");
                return Ok(());
            }
        };

        let url = self.config.url.as_str();
        tracing::info!(url, "connecting");

        let ws_stream =
            match tokio::time::timeout(self.config.connect_timeout, connect_async(url)).await {
                Err(_) => {
                    tracing::warn!(url, "WebSocket connect timed out");
                    self.session.connect_failed(generation);
                    return Err(TransportError::Timeout);
                }
                Ok(Err(e)) => {
                    tracing::warn!(url, err = %e, "WebSocket connect failed");
                    self.session.connect_failed(generation);
                    return Err(map_ws_connect_error(url, e));
                }
                Ok(Ok((ws_stream, _response))) => ws_stream,
            };

        let (mut sink, stream) = ws_stream.split();

        // Install the sink before flipping to Connected so a send that sees
        // the new state also finds the sink.
        let mut sender = self.ws_sender.lock().await;
        let Some(tx) = self.session.connect_succeeded(generation) else {
            drop(sender);
            tracing::info!(url, "session closed during handshake, dropping connection");
            let _ = sink.close().await;
            return Err(TransportError::ConnectionClosed);
        };
        *sender = Some(sink);
        drop(sender);

        let handle = tokio::spawn(reader_loop(
            stream,
            tx,
            Arc::clone(&self.session),
            generation,
        ));
        if let Some(old) = self.reader.lock().replace(handle) {
            old.abort();
        }

        tracing::info!(url, "connected");
        Ok(())
    }

    async fn send(&self, text: &str) -> bool {
        if !self.session.is_live() {
            return false;
        }

        let mut sender = self.ws_sender.lock().await;
        let Some(sink) = sender.as_mut() else {
            return false;
        };

        match sink.send(Message::Text(text.to_owned().into())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket send failed");
                *sender = None;
                self.session.connection_lost(self.session.generation(), true);
                false
            }
        }
    }

    fn incoming(&self) -> Option<IncomingStream> {
        self.session.take_incoming()
    }

    async fn close(&self) {
        self.session.reset();
        self.shutdown_connection().await;
        tracing::info!(url = %self.config.url, "closed");
    }

    fn state(&self) -> ConnectionState {
        self.session.state()
    }

    fn subscribe(&self) -> tokio::sync::watch::Receiver<bool> {
        self.session.subscribe()
    }

    async fn set_mode(&self, mode: TransportMode) {
        let previous = self.session.set_mode(mode);
        if previous == mode {
            return;
        }
        tracing::info!(?mode, "transport mode changed");
        if mode == TransportMode::SimulatedOffline
            && self.session.state() != ConnectionState::Disconnected
        {
            self.close().await;
        }
    }

    fn mode(&self) -> TransportMode {
        self.session.mode()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }
}

/// Background task that reads WebSocket frames and forwards text payloads.
///
/// Binary frames are accepted if they hold valid UTF-8 and skipped
/// otherwise. Reports the connection as lost when the socket closes or
/// errors. If the consumer has dropped its stream the loop keeps reading so
/// the connection stays healthy, discarding what arrives.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<String>,
    session: Arc<Session>,
    generation: u64,
) {
    let mut consumer_attached = true;
    let mut failed = false;

    while let Some(msg_result) = ws_reader.next().await {
        let payload = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(len = data.len(), "non-UTF-8 binary frame, skipping");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by remote");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                failed = true;
                break;
            }
        };

        if consumer_attached && tx.send(payload).await.is_err() {
            tracing::debug!("incoming consumer dropped, discarding further payloads");
            consumer_attached = false;
        }
    }

    session.connection_lost(generation, failed);
    tracing::info!("reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "endpoint HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "WebSocket connection error: {other}"
        ))),
    }
}
