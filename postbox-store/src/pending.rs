//! The pending outbox: messages the transport did not accept.

use rusqlite::{OptionalExtension, params};

use crate::chats::write_preview;
use crate::database::Store;
use crate::error::{Result, StoreError};
use crate::messages::insert_message;
use crate::models::{ChatId, MessageId, PendingId, PendingMessage};

const PENDING_COLUMNS: &str = "id, chat_id, sender, body, timestamp";

impl Store {
    /// Queue an outbound message for a later retry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`] if the chat does not exist, or a
    /// storage error if the insert fails.
    pub fn enqueue_pending(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<PendingId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_messages (chat_id, sender, body, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![chat_id, sender, body, timestamp],
            )?;
            let id = PendingId::new(conn.last_insert_rowid());
            tracing::debug!(chat_id = %chat_id, pending_id = %id, "message queued");
            Ok(id)
        })
    }

    /// Every pending entry, grouped by chat and oldest first within a chat.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_pending(&self) -> Result<Vec<PendingMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PENDING_COLUMNS} FROM pending_messages
                 ORDER BY chat_id ASC, timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], row_to_pending)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Pending entries of one chat, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_pending_for_chat(&self, chat_id: ChatId) -> Result<Vec<PendingMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PENDING_COLUMNS} FROM pending_messages
                 WHERE chat_id = ?1
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![chat_id], row_to_pending)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Fetch one pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is absent.
    pub fn get_pending(&self, pending_id: PendingId) -> Result<PendingMessage> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PENDING_COLUMNS} FROM pending_messages WHERE id = ?1"),
                params![pending_id],
                row_to_pending,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("pending message {pending_id}")))
        })
    }

    /// Remove a pending entry. Absent ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn delete_pending(&self, pending_id: PendingId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pending_messages WHERE id = ?1",
                params![pending_id],
            )?;
            Ok(())
        })
    }

    /// Turn a pending entry into a delivered message.
    ///
    /// Deletes the pending row, inserts a read, delivered message with the
    /// original sender, body and timestamp, and points the chat preview at
    /// it, all in one transaction. Returns `None` if the pending entry no
    /// longer exists (for example, another sweep already promoted it).
    ///
    /// # Errors
    ///
    /// Returns a storage or constraint error; the pending entry is left in
    /// place in that case.
    pub fn promote_pending(&self, pending_id: PendingId) -> Result<Option<MessageId>> {
        self.with_tx(|tx| {
            let Some(pending) = tx
                .query_row(
                    &format!("SELECT {PENDING_COLUMNS} FROM pending_messages WHERE id = ?1"),
                    params![pending_id],
                    row_to_pending,
                )
                .optional()?
            else {
                return Ok(None);
            };

            tx.execute(
                "DELETE FROM pending_messages WHERE id = ?1",
                params![pending_id],
            )?;
            let message_id = insert_message(
                tx,
                pending.chat_id,
                &pending.sender,
                &pending.body,
                pending.timestamp,
                false,
            )?;
            write_preview(tx, pending.chat_id, &pending.body, pending.timestamp)?;

            tracing::debug!(
                pending_id = %pending_id,
                message_id = %message_id,
                chat_id = %pending.chat_id,
                "pending message promoted"
            );
            Ok(Some(message_id))
        })
    }
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingMessage> {
    Ok(PendingMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender: row.get(2)?,
        body: row.get(3)?,
        timestamp: row.get(4)?,
    })
}
