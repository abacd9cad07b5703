//! `Postbox`: offline-tolerant chat delivery core.
//!
//! Outbound messages are tried once over a single WebSocket and recorded
//! either as delivered or in a durable pending outbox; the outbox is drained
//! when connectivity returns. Storage lives in the `postbox-store` crate.

pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod connectivity;
pub mod delivery;
pub mod transport;
