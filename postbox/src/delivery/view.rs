//! Display-ready merged message list.

use postbox_store::{ChatId, Message, MessageId, PendingId, PendingMessage};

use crate::transport::Transport;

use super::{Coordinator, DeliveryError};

/// Where a [`MessageView`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// A delivered message row.
    Delivered {
        /// Row id in the message log.
        id: MessageId,
        /// Still unread by the local user.
        unread: bool,
    },
    /// A pending outbox entry; the display layer can offer a retry.
    Pending {
        /// Row id in the outbox.
        id: PendingId,
    },
}

/// One entry of a chat's merged message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub chat_id: ChatId,
    pub sender: String,
    pub body: String,
    pub timestamp: i64,
    pub state: DeliveryState,
}

impl MessageView {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, DeliveryState::Pending { .. })
    }

    /// Pending id, if this entry is still in the outbox.
    #[must_use]
    pub const fn pending_id(&self) -> Option<PendingId> {
        match self.state {
            DeliveryState::Pending { id } => Some(id),
            DeliveryState::Delivered { .. } => None,
        }
    }
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            chat_id: m.chat_id,
            sender: m.sender,
            body: m.body,
            timestamp: m.timestamp,
            state: DeliveryState::Delivered {
                id: m.id,
                unread: m.unread,
            },
        }
    }
}

impl From<PendingMessage> for MessageView {
    fn from(p: PendingMessage) -> Self {
        Self {
            chat_id: p.chat_id,
            sender: p.sender,
            body: p.body,
            timestamp: p.timestamp,
            state: DeliveryState::Pending { id: p.id },
        }
    }
}

/// Merge delivered and pending rows into one timestamp-ascending list.
///
/// On equal timestamps delivered entries come before pending ones. Within
/// each source the input order is kept, so callers should pass rows in
/// store order.
#[must_use]
pub fn merge_views(messages: Vec<Message>, pending: Vec<PendingMessage>) -> Vec<MessageView> {
    let mut views: Vec<MessageView> = messages
        .into_iter()
        .map(MessageView::from)
        .chain(pending.into_iter().map(MessageView::from))
        .collect();
    // Stable: ties within one source keep their input order.
    views.sort_by_key(|v| (v.timestamp, v.is_pending()));
    views
}

impl<T: Transport> Coordinator<T> {
    /// The chat's delivered and pending messages as one list.
    ///
    /// Recomputed from the store on every call.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if either query fails.
    pub fn get_messages(&self, chat_id: ChatId) -> Result<Vec<MessageView>, DeliveryError> {
        let messages = self.store.list_messages(chat_id)?;
        let pending = self.store.list_pending_for_chat(chat_id)?;
        Ok(merge_views(messages, pending))
    }
}
