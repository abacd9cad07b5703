//! Delivered message rows and the transactional write paths that keep the
//! chat preview and unread counter in step with them.

use rusqlite::{Connection, params};

use crate::chats::{bump_unread, write_preview};
use crate::database::Store;
use crate::error::Result;
use crate::models::{ChatId, Message, MessageId};

impl Store {
    /// Append a delivered message to a chat.
    ///
    /// Touches neither the preview nor the unread counter; see
    /// [`record_outgoing`](Self::record_outgoing) and
    /// [`record_incoming`](Self::record_incoming) for the combined writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`](crate::StoreError::Constraint) if
    /// `chat_id` does not exist, or a storage error if the insert fails.
    pub fn append_message(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
        timestamp: i64,
        unread: bool,
    ) -> Result<MessageId> {
        self.with_conn(|conn| insert_message(conn, chat_id, sender, body, timestamp, unread))
    }

    /// All delivered messages of a chat, oldest first. Equal timestamps keep
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender, body, timestamp, unread, delivered
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![chat_id], row_to_message)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Number of the chat's messages whose unread flag is still set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn unread_message_count(&self, chat_id: ChatId) -> Result<u32> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND unread = 1",
                params![chat_id],
                |row| row.get(0),
            )?)
        })
    }

    /// Clear the unread flag on every message of the chat and reset its
    /// counter, as one transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either update fails; neither is applied
    /// in that case.
    pub fn mark_read(&self, chat_id: ChatId) -> Result<()> {
        self.with_tx(|tx| {
            let cleared = tx.execute(
                "UPDATE messages SET unread = 0 WHERE chat_id = ?1 AND unread = 1",
                params![chat_id],
            )?;
            tx.execute(
                "UPDATE chats SET unread_count = 0 WHERE id = ?1",
                params![chat_id],
            )?;
            tracing::debug!(chat_id = %chat_id, cleared, "chat marked read");
            Ok(())
        })
    }

    /// Record a message the local user sent: a read, delivered row plus the
    /// new chat preview, committed together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`](crate::StoreError::Constraint) if
    /// the chat does not exist, or a storage error; nothing is written then.
    pub fn record_outgoing(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<MessageId> {
        self.with_tx(|tx| {
            let id = insert_message(tx, chat_id, sender, body, timestamp, false)?;
            write_preview(tx, chat_id, body, timestamp)?;
            Ok(id)
        })
    }

    /// Record a message received from the transport: an unread row, the new
    /// preview and one more unread on the counter, committed together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Constraint`](crate::StoreError::Constraint) if
    /// the chat does not exist, or a storage error; nothing is written then.
    pub fn record_incoming(
        &self,
        chat_id: ChatId,
        sender: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<MessageId> {
        self.with_tx(|tx| {
            let id = insert_message(tx, chat_id, sender, body, timestamp, true)?;
            write_preview(tx, chat_id, body, timestamp)?;
            bump_unread(tx, chat_id)?;
            Ok(id)
        })
    }
}

pub(crate) fn insert_message(
    conn: &Connection,
    chat_id: ChatId,
    sender: &str,
    body: &str,
    timestamp: i64,
    unread: bool,
) -> Result<MessageId> {
    conn.execute(
        "INSERT INTO messages (chat_id, sender, body, timestamp, unread, delivered)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![chat_id, sender, body, timestamp, unread],
    )?;
    Ok(MessageId::new(conn.last_insert_rowid()))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender: row.get(2)?,
        body: row.get(3)?,
        timestamp: row.get(4)?,
        unread: row.get(5)?,
        delivered: row.get(6)?,
    })
}
