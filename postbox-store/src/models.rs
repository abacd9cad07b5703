//! Row types and store-assigned identifiers.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw row id.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Return the raw row id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

row_id!(
    /// Identity of a chat, assigned by the store on creation.
    ChatId
);
row_id!(
    /// Identity of a delivered message row.
    MessageId
);
row_id!(
    /// Identity of a pending outbox row. Independent of [`MessageId`].
    PendingId
);

/// A conversation thread and its preview projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub name: String,
    /// Body of the most recently recorded message, empty for a new chat.
    pub last_message: String,
    /// Epoch millis of the preview message, `0` for a new chat.
    pub last_message_time: i64,
    pub unread_count: u32,
}

/// A message that was handed to the transport or received from it.
///
/// Rows of this kind never represent an in-flight or failed send; those live
/// in the outbox as [`PendingMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: String,
    pub body: String,
    /// Epoch millis, used for ordering only.
    pub timestamp: i64,
    pub unread: bool,
    pub delivered: bool,
}

/// An outbound message the transport did not take, waiting for a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: PendingId,
    pub chat_id: ChatId,
    pub sender: String,
    pub body: String,
    /// Epoch millis of the original send attempt.
    pub timestamp: i64,
}
