//! Per-volume mutual exclusion for lifecycle operations.
//!
//! CSI orchestrators retry aggressively, so two requests for the same volume
//! can easily overlap.  [`InFlight`] records which volume identifiers are
//! currently being worked on; a request that cannot claim its identifier is
//! rejected with [`CsiError::InFlight`] (`ABORTED`) and retried later by the
//! orchestrator.  Requests for different volumes never contend.
//!
//! An identifier stays claimed only for as long as its [`InFlightGuard`]
//! lives.  The guard is released on every exit path, including unwinding.
//! If the process dies mid-operation nothing survives the restart, so there
//! is no expiry.

use dashmap::DashSet;
use tracing::trace;

use crate::error::CsiError;

/// Registry of volume identifiers with an operation in progress.
#[derive(Debug, Default)]
pub struct InFlight {
    ids: DashSet<String>,
}

impl InFlight {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `id`.  Returns `false` if it is already claimed.
    pub fn acquire(&self, id: &str) -> bool {
        let acquired = self.ids.insert(id.to_owned());
        trace!(id, acquired, "in-flight acquire");
        acquired
    }

    /// Release a claim on `id`.  Releasing an unclaimed id is a no-op.
    pub fn release(&self, id: &str) {
        self.ids.remove(id);
        trace!(id, "in-flight release");
    }

    /// Whether `id` is currently claimed.
    pub fn is_held(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Claim `id` for the lifetime of the returned guard.
    pub fn lock(&self, id: &str) -> Result<InFlightGuard<'_>, CsiError> {
        if self.acquire(id) {
            Ok(InFlightGuard {
                registry: self,
                id: id.to_owned(),
            })
        } else {
            Err(CsiError::InFlight(id.to_owned()))
        }
    }
}

/// Releases its identifier when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    registry: &'a InFlight,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}
