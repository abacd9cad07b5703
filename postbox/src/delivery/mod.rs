//! Delivery coordination for Postbox.
//!
//! Contains the [`Coordinator`], which decides for every outbound message
//! whether it is recorded as delivered or queued in the pending outbox,
//! drains that outbox when asked to, and records inbound payloads together
//! with their preview and unread effects.
//!
//! The coordinator holds no authoritative state of its own. Everything
//! durable lives in the [`Store`]; the merged message view returned by
//! [`Coordinator::get_messages`] is recomputed on every call.
//!
//! Failures fall into two groups:
//! - store errors propagate as [`DeliveryError::Store`] and are never retried
//!   here;
//! - an unavailable transport is a `false` from `send`, never an error.
//!
//! Problems that only a human can act on are additionally surfaced as
//! [`Notice`]s on a bounded channel. Emission is best-effort: a full channel
//! drops the notice rather than stalling delivery.

mod receive;
mod retry;
mod send;
mod view;

use std::sync::Arc;

use tokio::sync::mpsc;

use postbox_store::{Chat, ChatId, PendingId, Store, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::transport::Transport;

pub use retry::{RetryOutcome, RetrySummary};
pub use view::{DeliveryState, MessageView, merge_views};

/// Default capacity of the notice channel.
pub const DEFAULT_NOTICE_BUFFER: usize = 64;

/// Errors returned by [`Coordinator`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The store failed; nothing was retried.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Human-facing notification about a delivery problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A message could not be handed to the transport and was queued.
    Queued {
        /// Chat the message belongs to.
        chat_id: ChatId,
    },
    /// The transport refused a message that was still recorded as delivered
    /// because the connectivity flag said we were online.
    SendFailed(String),
    /// A pending entry could not be promoted during a retry.
    RetryFailed {
        /// The entry that stayed pending.
        pending_id: PendingId,
        /// Why it failed.
        reason: String,
    },
    /// A retry sweep could not run at all.
    SweepFailed(String),
    /// A received payload could not be recorded.
    IncomingSaveFailed(String),
    /// Opening the connection failed.
    ConnectFailed(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued { chat_id } => {
                write!(f, "offline: message queued in chat {chat_id}")
            }
            Self::SendFailed(reason) => write!(f, "send failed: {reason}"),
            Self::RetryFailed { pending_id, reason } => {
                write!(f, "retry of pending message {pending_id} failed: {reason}")
            }
            Self::SweepFailed(reason) => write!(f, "retry failed: {reason}"),
            Self::IncomingSaveFailed(reason) => {
                write!(f, "could not save incoming message: {reason}")
            }
            Self::ConnectFailed(reason) => write!(f, "could not connect: {reason}"),
        }
    }
}

/// Orchestrates sends, retries and inbound recording over one store and one
/// transport.
pub struct Coordinator<T: Transport> {
    store: Store,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    notice_tx: mpsc::Sender<Notice>,
}

impl<T: Transport> Coordinator<T> {
    /// Create a coordinator timestamping with the system clock.
    ///
    /// Returns the coordinator and the receiving end of its notice channel.
    pub fn new(
        store: Store,
        transport: Arc<T>,
        notice_buffer: usize,
    ) -> (Self, mpsc::Receiver<Notice>) {
        Self::with_clock(store, transport, Arc::new(SystemClock), notice_buffer)
    }

    /// Create a coordinator with an explicit clock.
    pub fn with_clock(
        store: Store,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
        notice_buffer: usize,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::channel(notice_buffer.max(1));
        let coordinator = Self {
            store,
            transport,
            clock,
            notice_tx,
        };
        (coordinator, notice_rx)
    }

    /// The store this coordinator writes to.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The transport this coordinator sends through.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Create a chat with an empty preview and no unread messages.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the insert fails.
    pub fn create_chat(&self, name: &str) -> Result<ChatId, DeliveryError> {
        let chat_id = self.store.create_chat(name)?;
        tracing::info!(chat_id = %chat_id, name, "chat created");
        Ok(chat_id)
    }

    /// All chats, most recent activity first.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the query fails.
    pub fn list_chats(&self) -> Result<Vec<Chat>, DeliveryError> {
        Ok(self.store.list_chats()?)
    }

    /// Delete every chat together with its messages and pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the delete fails.
    pub fn clear_all(&self) -> Result<(), DeliveryError> {
        self.store.clear_all()?;
        tracing::info!("all chats cleared");
        Ok(())
    }

    /// Mark every message of the chat read and reset its unread counter.
    ///
    /// Calling it again changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the update fails.
    pub fn mark_chat_read(&self, chat_id: ChatId) -> Result<(), DeliveryError> {
        Ok(self.store.mark_read(chat_id)?)
    }

    /// Drop a pending entry without sending it. Absent ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the delete fails.
    pub fn discard_pending(&self, pending_id: PendingId) -> Result<(), DeliveryError> {
        self.store.delete_pending(pending_id)?;
        tracing::debug!(pending_id = %pending_id, "pending message discarded");
        Ok(())
    }

    /// Emit a notice without waiting. A full or closed channel drops it.
    pub(crate) fn notify(&self, notice: Notice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            tracing::debug!(error = %e, "notice dropped");
        }
    }
}
