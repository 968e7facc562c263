//! Misuse diagnostics.
//!
//! Misuse never aborts the caller. It is reported as a `tracing` warning and
//! the offending operation is either skipped or allowed to proceed.

use thiserror::Error;

use super::id::StoreId;

/// An operation attempted inside a tracked computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Misuse {
    /// A store was created while a watch frame was active. The store is
    /// still created.
    #[error(
        "a store was created inside a tracked computation; \
         tracked computations are for reading stores, not creating them"
    )]
    CreateWhileTracking,

    /// A store was written while a watch frame was active. The write is
    /// skipped.
    #[error(
        "a store was written inside a tracked computation; \
         tracked computations are read-only and the write was ignored"
    )]
    WriteWhileTracking,

    /// A store was subscribed to while a read-only watch frame was active.
    /// The subscription is skipped.
    #[error(
        "a store was subscribed to inside a read-only tracked computation; \
         the subscription was ignored"
    )]
    SubscribeWhileTracking,
}

impl Misuse {
    /// Emit the warning.
    pub(crate) fn report(self, store: Option<StoreId>) {
        match store {
            Some(store) => tracing::warn!(misuse = ?self, %store, "{}", self),
            None => tracing::warn!(misuse = ?self, "{}", self),
        }
    }
}
