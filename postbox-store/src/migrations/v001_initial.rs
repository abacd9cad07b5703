//! v001: chats, delivered messages and the pending outbox.

use rusqlite::Connection;

const UP_SQL: &str = r"
CREATE TABLE IF NOT EXISTS chats (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT    NOT NULL,
    last_message      TEXT    NOT NULL DEFAULT '',
    last_message_time INTEGER NOT NULL DEFAULT 0,       -- epoch millis
    unread_count      INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0)
);

CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id   INTEGER NOT NULL,
    sender    TEXT    NOT NULL,
    body      TEXT    NOT NULL,
    timestamp INTEGER NOT NULL,                         -- epoch millis
    unread    INTEGER NOT NULL DEFAULT 1,
    delivered INTEGER NOT NULL DEFAULT 1,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, timestamp);

CREATE TABLE IF NOT EXISTS pending_messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id   INTEGER NOT NULL,
    sender    TEXT    NOT NULL,
    body      TEXT    NOT NULL,
    timestamp INTEGER NOT NULL,                         -- time of the failed attempt

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_pending_chat_ts ON pending_messages(chat_id, timestamp);
";

/// Upgrade from version 0 to version 1.
///
/// # Errors
///
/// Returns the underlying SQLite error if any statement fails.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
