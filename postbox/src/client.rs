//! Client wiring: the surface a front end talks to.
//!
//! [`ChatClient`] bundles the coordinator, the transport and the
//! connectivity receiver and starts the two background tasks a running
//! client needs: the reconnect driver and the incoming router.
//!
//! Everything is pull-based. The chat list and the message list are
//! re-read from the store on every call; nothing pushes store changes to the
//! caller. Only the connection state (a `watch` receiver) and the notice
//! channel are observable.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use postbox_store::{Chat, ChatId, PendingId, Store};

use crate::clock::{Clock, SystemClock};
use crate::connectivity::spawn_reconnect_driver;
use crate::delivery::{
    Coordinator, DEFAULT_NOTICE_BUFFER, DeliveryError, MessageView, Notice, RetryOutcome,
    RetrySummary,
};
use crate::transport::Transport;

/// Name given to the chat created for an incoming payload when none exist.
pub const AUTO_CHAT_NAME: &str = "Auto Chat";

/// Which chat an incoming payload is recorded in.
///
/// Payloads carry no conversation key, so this is a placeholder policy
/// rather than real routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncomingRoute {
    /// The last chat in [`Store::list_chats`] order (the one with the
    /// oldest activity). A chat named [`AUTO_CHAT_NAME`] is created when
    /// there are none.
    #[default]
    LastListed,
    /// Always this chat.
    Fixed(ChatId),
}

/// Labels and policies for a [`ChatClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Sender recorded on outbound messages.
    pub sender_label: String,
    /// Sender recorded on incoming payloads.
    pub bot_label: String,
    pub incoming_route: IncomingRoute,
    pub notice_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            sender_label: "You".to_string(),
            bot_label: "Bot".to_string(),
            incoming_route: IncomingRoute::default(),
            notice_buffer: DEFAULT_NOTICE_BUFFER,
        }
    }
}

/// A running chat client over one store and one transport.
pub struct ChatClient<T: Transport + 'static> {
    coordinator: Arc<Coordinator<T>>,
    connectivity: watch::Receiver<Option<bool>>,
    options: ClientOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport + 'static> ChatClient<T> {
    /// Build a client. No task runs until [`start`](Self::start).
    ///
    /// Returns the client and the receiving end of its notice channel.
    pub fn new(
        store: Store,
        transport: Arc<T>,
        connectivity: watch::Receiver<Option<bool>>,
        options: ClientOptions,
    ) -> (Self, mpsc::Receiver<Notice>) {
        Self::with_clock(store, transport, connectivity, options, Arc::new(SystemClock))
    }

    /// Build a client with an explicit clock.
    pub fn with_clock(
        store: Store,
        transport: Arc<T>,
        connectivity: watch::Receiver<Option<bool>>,
        options: ClientOptions,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (coordinator, notices) =
            Coordinator::with_clock(store, transport, clock, options.notice_buffer);
        let client = Self {
            coordinator: Arc::new(coordinator),
            connectivity,
            options,
            tasks: Mutex::new(Vec::new()),
        };
        (client, notices)
    }

    /// Start the reconnect driver and the incoming router.
    ///
    /// Calling it again while they run does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(spawn_reconnect_driver(
            Arc::clone(&self.coordinator),
            self.connectivity.clone(),
        ));
        tasks.push(spawn_incoming_router(
            Arc::clone(&self.coordinator),
            self.options.incoming_route,
            self.options.bot_label.clone(),
        ));
        tracing::info!(
            transport = %self.coordinator.transport().transport_type(),
            "client started"
        );
    }

    /// Stop the background tasks and close the transport.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.coordinator.transport().close().await;
        tracing::info!("client shut down");
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether the connectivity signal currently reads online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow() == Some(true)
    }

    /// Observe the transport's connection state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.coordinator.transport().subscribe()
    }

    /// Current chat list, most recent activity first.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the query fails.
    pub fn chats(&self) -> Result<Vec<Chat>, DeliveryError> {
        self.coordinator.list_chats()
    }

    /// Current merged message list of a chat.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the query fails.
    pub fn messages(&self, chat_id: ChatId) -> Result<Vec<MessageView>, DeliveryError> {
        self.coordinator.get_messages(chat_id)
    }

    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the insert fails.
    pub fn create_chat(&self, name: &str) -> Result<ChatId, DeliveryError> {
        self.coordinator.create_chat(name)
    }

    /// Send as the local user, trusting the connectivity signal for where the
    /// message is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the record could not be written.
    pub async fn send(&self, chat_id: ChatId, body: &str) -> Result<bool, DeliveryError> {
        let online = self.is_online();
        self.coordinator
            .send_message(chat_id, &self.options.sender_label, body, online)
            .await
    }

    /// Retry one pending entry, only if the connectivity signal reads online.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the lookup or promotion fails.
    pub async fn retry_one(
        &self,
        chat_id: ChatId,
        pending_id: PendingId,
    ) -> Result<RetryOutcome, DeliveryError> {
        let online = self.is_online();
        self.coordinator
            .retry_single(chat_id, pending_id, online)
            .await
    }

    /// Sweep the whole outbox now.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the outbox cannot be listed.
    pub async fn retry_all(&self) -> Result<RetrySummary, DeliveryError> {
        self.coordinator.retry_pending().await
    }

    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the delete fails.
    pub fn discard(&self, pending_id: PendingId) -> Result<(), DeliveryError> {
        self.coordinator.discard_pending(pending_id)
    }

    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the update fails.
    pub fn mark_read(&self, chat_id: ChatId) -> Result<(), DeliveryError> {
        self.coordinator.mark_chat_read(chat_id)
    }

    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the delete fails.
    pub fn clear_all(&self) -> Result<(), DeliveryError> {
        self.coordinator.clear_all()
    }
}

/// Spawn the task that records every incoming payload.
///
/// Each payload is saved with `bot_label` as sender in the chat picked by
/// `route`. Failures are logged and reported as
/// [`Notice::IncomingSaveFailed`]; the payload is then lost but the router
/// keeps going.
///
/// When the transport is closed its stream ends and the router attaches to
/// the next session's stream. If another consumer holds the stream, the
/// router waits for the connection signal to change and tries again.
pub fn spawn_incoming_router<T>(
    coordinator: Arc<Coordinator<T>>,
    route: IncomingRoute,
    bot_label: String,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        let mut signal = coordinator.transport().subscribe();
        loop {
            if let Some(mut stream) = coordinator.transport().incoming() {
                tracing::debug!("incoming router attached");
                while let Some(payload) = stream.next().await {
                    route_incoming(&coordinator, route, &bot_label, &payload);
                }
                tracing::debug!("incoming stream ended");
                continue;
            }
            if signal.changed().await.is_err() {
                break;
            }
        }
    })
}

fn route_incoming<T: Transport>(
    coordinator: &Coordinator<T>,
    route: IncomingRoute,
    sender: &str,
    payload: &str,
) {
    let saved = target_chat(coordinator, route)
        .and_then(|chat_id| coordinator.save_incoming(chat_id, sender, payload));
    if let Err(e) = saved {
        tracing::warn!(error = %e, "failed to save incoming message");
        coordinator.notify(Notice::IncomingSaveFailed(e.to_string()));
    }
}

fn target_chat<T: Transport>(
    coordinator: &Coordinator<T>,
    route: IncomingRoute,
) -> Result<ChatId, DeliveryError> {
    match route {
        IncomingRoute::Fixed(chat_id) => Ok(chat_id),
        IncomingRoute::LastListed => match coordinator.list_chats()?.last() {
            Some(chat) => Ok(chat.id),
            None => coordinator.create_chat(AUTO_CHAT_NAME),
        },
    }
}
