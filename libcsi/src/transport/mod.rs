//! QUIC transport for the controller services.
//!
//! Every request travels on its own bi-directional stream: the caller writes
//! one JSON-encoded [`CsiMessage`](crate::message::CsiMessage), finishes its
//! send side and reads exactly one message back.

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::CsiServer;

/// Upper bound on one encoded message in either direction.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
