//! Outbound path for [`Coordinator`].

use postbox_store::ChatId;

use crate::transport::Transport;

use super::{Coordinator, DeliveryError, Notice};

impl<T: Transport> Coordinator<T> {
    /// Send one message and record it durably.
    ///
    /// The transport is tried exactly once whatever `known_connected` says.
    /// The flag alone decides where the message is recorded:
    /// - `true`: a delivered message plus the new chat preview, even if the
    ///   transport refused the payload (a [`Notice::SendFailed`] is emitted
    ///   in that case);
    /// - `false`: a pending entry, with the preview left alone, and a
    ///   [`Notice::Queued`].
    ///
    /// Returns the raw transport result.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the record could not be written.
    /// The transport attempt has already happened by then.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
        known_connected: bool,
    ) -> Result<bool, DeliveryError> {
        let timestamp = self.clock.now_millis();
        let accepted = self.transport.send(body).await;

        if known_connected {
            let message_id = self
                .store
                .record_outgoing(chat_id, sender, body, timestamp)?;
            tracing::debug!(
                chat_id = %chat_id,
                message_id = %message_id,
                accepted,
                "message recorded as delivered"
            );
            if !accepted {
                tracing::warn!(chat_id = %chat_id, "transport refused a message sent while online");
                self.notify(Notice::SendFailed(format!(
                    "transport refused the message in chat {chat_id}"
                )));
            }
        } else {
            let pending_id = self
                .store
                .enqueue_pending(chat_id, sender, body, timestamp)?;
            tracing::debug!(
                chat_id = %chat_id,
                pending_id = %pending_id,
                accepted,
                "message queued while offline"
            );
            self.notify(Notice::Queued { chat_id });
        }

        Ok(accepted)
    }
}
