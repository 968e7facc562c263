//! Identifiers for stores and subscriptions.
//!
//! Both are plain counters. The only properties we rely on are uniqueness
//! within the process and stability for the lifetime of the owner.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a store.
///
/// A store keeps its ID for its whole life. Forking a store produces a new
/// store with a new ID. The ID is used as the key of a watch frame's
/// dependency set and can be used by consumers as a list key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(u64);

impl StoreId {
    /// Generate a new unique store ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Identifier of a single `subscribe` call.
///
/// Subscribing the same listener twice yields two IDs, so each subscription
/// can be revoked on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
