//! `Postbox` echo endpoint library.
//!
//! Exposes the echo server for use in tests and embedding. Every text frame
//! received from any connection is broadcast to all open connections,
//! including the one that sent it.

pub mod config;
pub mod server;
