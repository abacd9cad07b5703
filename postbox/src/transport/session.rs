//! Connection state machine shared by every [`Transport`](super::Transport)
//! implementation.
//!
//! A [`Session`] tracks the lifecycle state, the operating mode, the
//! observable connection signal and the bounded incoming channel. Each
//! `close` bumps a generation counter; work started under an older
//! generation (a slow handshake, a reader task) can no longer change the
//! state once the generation has moved on.

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{ConnectionState, IncomingStream, TransportMode};

/// Outcome of asking the session to start a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStart {
    /// Go ahead; report the result with this generation.
    Proceed(u64),
    /// Already connected, nothing to do.
    AlreadyConnected,
    /// Another caller's handshake is in flight.
    InProgress,
    /// Simulated offline: no attempt may be made.
    Offline,
}

struct Inner {
    state: ConnectionState,
    mode: TransportMode,
    generation: u64,
    incoming_tx: mpsc::Sender<String>,
    incoming_rx: Option<mpsc::Receiver<String>>,
}

/// State shared between a transport handle and its background tasks.
pub struct Session {
    inner: Mutex<Inner>,
    signal: watch::Sender<bool>,
    buffer: usize,
}

impl Session {
    /// Create a disconnected session whose incoming channel holds at most
    /// `buffer` undelivered payloads.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(buffer.max(1));
        let (signal, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                mode: TransportMode::Live,
                generation: 0,
                incoming_tx,
                incoming_rx: Some(incoming_rx),
            }),
            signal,
            buffer: buffer.max(1),
        }
    }

    /// Move to `Connecting` unless that would duplicate or contradict
    /// another state.
    pub fn begin_connect(&self) -> ConnectStart {
        let mut inner = self.inner.lock();
        if inner.mode == TransportMode::SimulatedOffline {
            drop(inner);
            self.signal.send_replace(false);
            return ConnectStart::Offline;
        }
        match inner.state {
            ConnectionState::Connected => ConnectStart::AlreadyConnected,
            ConnectionState::Connecting => ConnectStart::InProgress,
            ConnectionState::Disconnected | ConnectionState::Failed => {
                inner.state = ConnectionState::Connecting;
                ConnectStart::Proceed(inner.generation)
            }
        }
    }

    /// Record a completed handshake.
    ///
    /// Returns the sender the read loop should feed, or `None` if the
    /// session was closed (or switched offline) while the handshake ran; the
    /// caller must then discard its connection.
    pub fn connect_succeeded(&self, generation: u64) -> Option<mpsc::Sender<String>> {
        let mut inner = self.inner.lock();
        if inner.generation != generation
            || inner.state != ConnectionState::Connecting
            || inner.mode == TransportMode::SimulatedOffline
        {
            return None;
        }
        inner.state = ConnectionState::Connected;
        let tx = inner.incoming_tx.clone();
        drop(inner);
        self.signal.send_replace(true);
        Some(tx)
    }

    /// Record a failed handshake.
    pub fn connect_failed(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Failed;
        }
        drop(inner);
        self.signal.send_replace(false);
    }

    /// Record that an open connection went away.
    ///
    /// `failed` distinguishes an error from an orderly remote close.
    pub fn connection_lost(&self, generation: u64, failed: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connected {
            return;
        }
        inner.state = if failed {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        };
        drop(inner);
        self.signal.send_replace(false);
    }

    /// End the current session: `Disconnected`, signal `false`, and a fresh
    /// incoming channel. The old channel's sender held here is dropped; once
    /// the reader task's clone is gone too, the old stream ends.
    pub fn reset(&self) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.state = ConnectionState::Disconnected;
        inner.incoming_tx = tx;
        inner.incoming_rx = Some(rx);
        drop(inner);
        self.signal.send_replace(false);
    }

    /// Take this session's incoming stream, if nobody has yet.
    pub fn take_incoming(&self) -> Option<IncomingStream> {
        let rx = self.inner.lock().incoming_rx.take()?;
        Some(
            futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|text| (text, rx))
            })
            .boxed(),
        )
    }

    /// Sender into the incoming channel, only while connected.
    pub fn connected_sender(&self) -> Option<mpsc::Sender<String>> {
        let inner = self.inner.lock();
        (inner.state == ConnectionState::Connected).then(|| inner.incoming_tx.clone())
    }

    /// Change the operating mode, returning the previous one.
    pub fn set_mode(&self, mode: TransportMode) -> TransportMode {
        std::mem::replace(&mut self.inner.lock().mode, mode)
    }

    #[must_use]
    pub fn mode(&self) -> TransportMode {
        self.inner.lock().mode
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Connected and live: a `send` would attempt a write.
    #[must_use]
    pub fn is_live(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Connected && inner.mode == TransportMode::Live
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }
}
