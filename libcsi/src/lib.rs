//! # libcsi: Simplified CSI over QUIC for RK8s
//!
//! `libcsi` implements a lightweight [Container Storage Interface][csi] layer
//! that uses QUIC (via [`quinn`]) instead of gRPC for transport, together
//! with a controller plugin for the **BeeGFS** parallel file system.  It
//! follows the RK8s architecture conventions (Tokio async runtime, `tracing`
//! for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its status [`Code`] mapping. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete/validate. |
//! | [`inflight`] | Per-volume guard against overlapping requests. |
//! | [`fs`] | Injectable file system capability (`OsFs`, `MemFs`). |
//! | [`mount`] | Mount table access and mount primitives. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | Storage backends (BeeGFS). |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod error;
pub mod fs;
pub mod identity;
pub mod inflight;
pub mod message;
pub mod mount;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::CsiController;
pub use error::{Code, CsiError};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use types::*;
