//! Chat rows: creation, listing, preview and unread counter.

use rusqlite::{Connection, OptionalExtension, params};

use crate::database::Store;
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatId};

const CHAT_COLUMNS: &str = "id, name, last_message, last_message_time, unread_count";

impl Store {
    /// Insert a new chat with an empty preview and zero unread messages.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub fn create_chat(&self, name: &str) -> Result<ChatId> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO chats (name) VALUES (?1)", params![name])?;
            let id = ChatId::new(conn.last_insert_rowid());
            tracing::debug!(chat_id = %id, name, "chat created");
            Ok(id)
        })
    }

    /// Fetch one chat by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no chat has this id.
    pub fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![chat_id],
                row_to_chat,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("chat {chat_id}")))
        })
    }

    /// All chats, most recently active first. Chats with the same preview
    /// time keep their creation order.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats ORDER BY last_message_time DESC, id ASC"
            ))?;
            let rows = stmt.query_map([], row_to_chat)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete every chat. Messages and pending entries go with them through
    /// the cascading foreign keys.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn clear_all(&self) -> Result<()> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM chats", [])?;
            tracing::info!(chats = removed, "cleared all chats");
            Ok(())
        })
    }

    /// Overwrite the chat's preview text and time.
    ///
    /// Last writer wins: there is no comparison against the preview already
    /// stored, so a late write of an older message replaces a newer preview.
    /// An unknown `chat_id` matches no row and is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn update_chat_preview(&self, chat_id: ChatId, body: &str, timestamp: i64) -> Result<()> {
        self.with_conn(|conn| write_preview(conn, chat_id, body, timestamp))
    }

    /// Add one to the chat's unread counter. No-op for an unknown chat.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn increment_unread(&self, chat_id: ChatId) -> Result<()> {
        self.with_conn(|conn| bump_unread(conn, chat_id))
    }

    /// Set the chat's unread counter back to zero. No-op for an unknown chat.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn reset_unread(&self, chat_id: ChatId) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE chats SET unread_count = 0 WHERE id = ?1",
                params![chat_id],
            )?;
            log_missing_chat(updated, chat_id, "reset unread");
            Ok(())
        })
    }
}

pub(crate) fn write_preview(
    conn: &Connection,
    chat_id: ChatId,
    body: &str,
    timestamp: i64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE chats SET last_message = ?2, last_message_time = ?3 WHERE id = ?1",
        params![chat_id, body, timestamp],
    )?;
    log_missing_chat(updated, chat_id, "preview update");
    Ok(())
}

pub(crate) fn bump_unread(conn: &Connection, chat_id: ChatId) -> Result<()> {
    let updated = conn.execute(
        "UPDATE chats SET unread_count = unread_count + 1 WHERE id = ?1",
        params![chat_id],
    )?;
    log_missing_chat(updated, chat_id, "unread increment");
    Ok(())
}

fn log_missing_chat(updated: usize, chat_id: ChatId, what: &str) {
    if updated == 0 {
        tracing::debug!(chat_id = %chat_id, what, "no such chat, nothing updated");
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        name: row.get(1)?,
        last_message: row.get(2)?,
        last_message_time: row.get(3)?,
        unread_count: row.get(4)?,
    })
}
