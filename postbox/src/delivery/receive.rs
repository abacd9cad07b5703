//! Inbound path for [`Coordinator`].

use postbox_store::{ChatId, MessageId};

use crate::transport::Transport;

use super::{Coordinator, DeliveryError};

impl<T: Transport> Coordinator<T> {
    /// Record a payload received from the transport.
    ///
    /// Writes an unread message, points the chat preview at it and bumps the
    /// unread counter in a single store transaction, so the counter never
    /// drifts from the number of unread rows.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the chat is gone or the write
    /// fails; nothing is recorded in that case.
    pub fn save_incoming(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
    ) -> Result<MessageId, DeliveryError> {
        let timestamp = self.clock.now_millis();
        let message_id = self
            .store
            .record_incoming(chat_id, sender, body, timestamp)?;
        tracing::debug!(chat_id = %chat_id, message_id = %message_id, "incoming message saved");
        Ok(message_id)
    }
}
