//! Durable storage for Postbox chats, delivered messages and the pending outbox.
//!
//! The crate exposes an explicitly constructed [`Store`] handle wrapping a
//! single `rusqlite::Connection`. Handles are cheap to clone and safe to use
//! from several tasks at once; every operation takes the connection lock for
//! its whole duration, and the composite operations
//! ([`Store::record_outgoing`], [`Store::record_incoming`],
//! [`Store::promote_pending`], [`Store::mark_read`]) run inside one SQLite
//! transaction so their effects land together or not at all.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pending;

mod error;

pub use database::Store;
pub use error::{Result, StoreError};
pub use models::{Chat, ChatId, Message, MessageId, PendingId, PendingMessage};
