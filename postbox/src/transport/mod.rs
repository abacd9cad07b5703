//! Transport layer abstraction for Postbox.
//!
//! Defines the [`Transport`] trait the delivery core is generic over.
//! Implementations:
//! - [`socket::SocketTransport`]: one WebSocket connection to a fixed endpoint
//! - [`loopback::LoopbackTransport`]: in-process pair for tests and offline demos
//!
//! Both share the connection state machine in [`session`]:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected | Failed
//! ```

pub mod loopback;
pub mod session;
pub mod socket;

use std::fmt;

use futures_util::stream::BoxStream;
use tokio::sync::watch;

/// Default number of received payloads buffered before the read loop waits.
pub const DEFAULT_INCOMING_BUFFER: usize = 64;

/// Stream of received text payloads, in arrival order.
///
/// Ends normally when the session is closed.
pub type IncomingStream = BoxStream<'static, String>;

/// Lifecycle state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// The connection is open and `send` may succeed.
    Connected,
    /// The last handshake or the open connection failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Whether the transport talks to the network at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Normal operation.
    #[default]
    Live,
    /// Every `send` reports failure and `connect` makes no attempt.
    ///
    /// Used for deterministic offline testing without touching the real
    /// network state. Entering this mode closes a live connection; leaving
    /// it does not reconnect by itself.
    SimulatedOffline,
}

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket connection to the configured endpoint.
    WebSocket,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur while establishing a connection.
///
/// Sending never produces an error: an unavailable transport is reported as
/// a `false` return from [`Transport::send`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session was closed before the handshake completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The handshake did not complete in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O or protocol error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A duplex text connection with an observable connection signal.
///
/// All methods take `&self`; implementations are shared behind an `Arc` by
/// the delivery coordinator, the incoming router and the connectivity driver.
pub trait Transport: Send + Sync {
    /// Open the connection.
    ///
    /// Idempotent: a no-op while connected, and a concurrent call made while
    /// a handshake is in flight returns without starting a second one. In
    /// [`TransportMode::SimulatedOffline`] no attempt is made and the
    /// connection signal is forced to `false`.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hand one text payload to the transport.
    ///
    /// Returns `false` without trying when not connected or simulating
    /// offline. Otherwise makes one best-effort write and reports whether the
    /// transport accepted it. There is no acknowledgement from the remote
    /// side and no timeout.
    fn send(&self, text: &str) -> impl Future<Output = bool> + Send;

    /// Take the session's incoming stream.
    ///
    /// Only one consumer exists per session: the first call returns the
    /// stream, later calls return `None` until [`close`](Self::close)
    /// starts a new session.
    fn incoming(&self) -> Option<IncomingStream>;

    /// Drop the connection, flip the signal to `false` and end the incoming
    /// stream. Safe to call in any state, including never connected.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Observe the connection signal (`true` only while connected).
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Switch between live and simulated-offline operation.
    fn set_mode(&self, mode: TransportMode) -> impl Future<Output = ()> + Send;

    /// Current operating mode.
    fn mode(&self) -> TransportMode;

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Whether `send` would currently attempt a write.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.mode() == TransportMode::Live
    }
}
