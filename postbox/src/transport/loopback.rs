//! Loopback transport for testing.
//!
//! Two endpoints share nothing but a weak link to each other's session.
//! Sending on one end delivers to the other end's incoming stream while both
//! are connected. Created via [`LoopbackTransport::create_pair`].

use std::sync::{Arc, Weak};

use tokio::sync::watch;

use super::session::{ConnectStart, Session};
use super::{
    ConnectionState, IncomingStream, Transport, TransportError, TransportMode, TransportType,
};

/// In-process transport endpoint.
///
/// Behaves like [`SocketTransport`](super::socket::SocketTransport) from the
/// caller's side: it must be connected before `send` succeeds, honours
/// [`TransportMode::SimulatedOffline`], and ends its incoming stream on
/// `close`.
pub struct LoopbackTransport {
    session: Arc<Session>,
    peer: Weak<Session>,
}

impl LoopbackTransport {
    /// Create a pair of linked loopback transports, both disconnected.
    ///
    /// `buffer` bounds each side's incoming channel.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use futures_util::StreamExt;
    /// use postbox::transport::Transport;
    /// use postbox::transport::loopback::LoopbackTransport;
    ///
    /// # async fn example() {
    /// let (client, remote) = LoopbackTransport::create_pair(32);
    /// client.connect().await.unwrap();
    /// remote.connect().await.unwrap();
    /// let mut inbox = remote.incoming().unwrap();
    ///
    /// assert!(client.send("hello").await);
    /// assert_eq!(inbox.next().await.as_deref(), Some("hello"));
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, Self) {
        let a = Arc::new(Session::new(buffer));
        let b = Arc::new(Session::new(buffer));
        let left = Self {
            peer: Arc::downgrade(&b),
            session: a,
        };
        let right = Self {
            peer: Arc::downgrade(&left.session),
            session: b,
        };
        (left, right)
    }
}

impl Transport for LoopbackTransport {
    /// Mark this end connected.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] if the other end was dropped.
    async fn connect(&self) -> Result<(), TransportError> {
        let generation = match self.session.begin_connect() {
            ConnectStart::Proceed(generation) => generation,
            ConnectStart::AlreadyConnected | ConnectStart::InProgress | ConnectStart::Offline => {
                return Ok(());
            }
        };

        if self.peer.strong_count() == 0 {
            self.session.connect_failed(generation);
            return Err(TransportError::Unreachable("loopback peer".to_string()));
        }

        if self.session.connect_succeeded(generation).is_none() {
            return Err(TransportError::ConnectionClosed);
        }
        tracing::debug!("loopback connected");
        Ok(())
    }

    async fn send(&self, text: &str) -> bool {
        if !self.session.is_live() {
            return false;
        }
        let Some(peer) = self.peer.upgrade() else {
            self.session.connection_lost(self.session.generation(), true);
            return false;
        };
        let Some(tx) = peer.connected_sender() else {
            return false;
        };
        drop(peer);
        tx.send(text.to_owned()).await.is_ok()
    }

    fn incoming(&self) -> Option<IncomingStream> {
        self.session.take_incoming()
    }

    async fn close(&self) {
        self.session.reset();
    }

    fn state(&self) -> ConnectionState {
        self.session.state()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.session.subscribe()
    }

    async fn set_mode(&self, mode: TransportMode) {
        let previous = self.session.set_mode(mode);
        if previous != mode
            && mode == TransportMode::SimulatedOffline
            && self.session.state() != ConnectionState::Disconnected
        {
            self.session.reset();
        }
    }

    fn mode(&self) -> TransportMode {
        self.session.mode()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}
