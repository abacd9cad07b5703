//! Draining the pending outbox.
//!
//! Two entry points exist and they deliberately differ:
//! - [`Coordinator::retry_pending`] always tries the transport for every
//!   entry, whatever the connectivity signal says;
//! - [`Coordinator::retry_single`] does nothing unless the caller says the
//!   network is known to be up.
//!
//! Neither schedules anything. Sweeps are triggered from outside, normally by
//! the connectivity signal turning true.

use postbox_store::{ChatId, MessageId, PendingId};

use crate::transport::Transport;

use super::{Coordinator, DeliveryError, Notice};

/// What one [`retry_pending`](Coordinator::retry_pending) sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    /// Entries promoted to delivered messages, in processing order.
    pub delivered: Vec<PendingId>,
    /// Entries the transport refused; they stay queued.
    pub still_pending: usize,
    /// Entries accepted by the transport whose promotion failed in the store.
    pub failed: usize,
    /// Entries that disappeared between listing and promotion.
    pub vanished: usize,
}

impl RetrySummary {
    /// Number of transport attempts made.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.still_pending + self.failed + self.vanished
    }
}

/// Result of a targeted [`retry_single`](Coordinator::retry_single).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Sent and promoted to this message.
    Delivered(MessageId),
    /// The transport refused it; the entry is unchanged.
    StillPending,
    /// Not attempted because the network is not known to be up.
    Skipped,
    /// No such entry in that chat.
    NotFound,
}

impl<T: Transport> Coordinator<T> {
    /// Try every pending entry once, oldest first across all chats.
    ///
    /// Entries are ordered by timestamp, then id, with no grouping by chat.
    /// An accepted entry is promoted: the pending row is removed and a
    /// delivered message with the original sender, body and timestamp takes
    /// its place, becoming its chat's preview. A refused entry stays as it
    /// is and the sweep moves on without delay.
    ///
    /// A store failure on one entry is logged, reported as a
    /// [`Notice::RetryFailed`] and counted; it does not stop the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] only if the outbox cannot be listed.
    pub async fn retry_pending(&self) -> Result<RetrySummary, DeliveryError> {
        let mut queue = self.store.list_pending()?;
        queue.sort_by_key(|p| (p.timestamp, p.id));

        let mut summary = RetrySummary::default();
        for pending in queue {
            if !self.transport.send(&pending.body).await {
                summary.still_pending += 1;
                continue;
            }

            match self.store.promote_pending(pending.id) {
                Ok(Some(message_id)) => {
                    tracing::debug!(
                        pending_id = %pending.id,
                        message_id = %message_id,
                        chat_id = %pending.chat_id,
                        "pending message delivered"
                    );
                    summary.delivered.push(pending.id);
                }
                Ok(None) => {
                    tracing::debug!(pending_id = %pending.id, "pending message vanished mid-sweep");
                    summary.vanished += 1;
                }
                Err(e) => {
                    tracing::warn!(pending_id = %pending.id, error = %e, "failed to promote pending message");
                    self.notify(Notice::RetryFailed {
                        pending_id: pending.id,
                        reason: e.to_string(),
                    });
                    summary.failed += 1;
                }
            }
        }

        if summary.attempted() > 0 {
            tracing::info!(
                delivered = summary.delivered.len(),
                still_pending = summary.still_pending,
                failed = summary.failed,
                "retry sweep finished"
            );
        }
        Ok(summary)
    }

    /// Try one pending entry of one chat.
    ///
    /// When `known_connected` is false nothing is attempted and
    /// [`RetryOutcome::Skipped`] is returned. An id that does not exist, or
    /// that belongs to another chat, yields [`RetryOutcome::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if the lookup or the promotion fails.
    pub async fn retry_single(
        &self,
        chat_id: ChatId,
        pending_id: PendingId,
        known_connected: bool,
    ) -> Result<RetryOutcome, DeliveryError> {
        if !known_connected {
            tracing::debug!(pending_id = %pending_id, "offline, single retry skipped");
            return Ok(RetryOutcome::Skipped);
        }

        let pending = match self.store.get_pending(pending_id) {
            Ok(pending) => pending,
            Err(e) if e.is_not_found() => return Ok(RetryOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };
        if pending.chat_id != chat_id {
            return Ok(RetryOutcome::NotFound);
        }

        if !self.transport.send(&pending.body).await {
            return Ok(RetryOutcome::StillPending);
        }

        Ok(match self.store.promote_pending(pending_id)? {
            Some(message_id) => {
                tracing::debug!(pending_id = %pending_id, message_id = %message_id, "pending message delivered");
                RetryOutcome::Delivered(message_id)
            }
            None => RetryOutcome::NotFound,
        })
    }
}
