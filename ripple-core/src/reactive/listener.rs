//! Listener and subscription handles.
//!
//! A `Listener` is the zero-argument callback a store invokes after its
//! value changes. Its identity is the identity of the shared allocation, so
//! cloning a listener keeps its identity while wrapping the same closure
//! twice does not. The batch context deduplicates by this identity.

use std::fmt;
use std::sync::{Arc, Weak};

use super::id::SubscriptionId;

/// A shared change callback.
#[derive(Clone)]
pub struct Listener {
    notify: Arc<dyn Fn() + Send + Sync>,
}

/// Identity of a listener, used as the key of the batch's pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerKey(usize);

impl Listener {
    /// Create a new listener from a callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Invoke the callback.
    pub fn notify(&self) {
        (self.notify)();
    }

    /// Whether two handles refer to the same callback.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }

    pub(crate) fn key(&self) -> ListenerKey {
        // Thin pointer only; the vtable half is irrelevant to identity.
        ListenerKey(Arc::as_ptr(&self.notify) as *const () as usize)
    }
}

impl<F> From<F> for Listener
where
    F: Fn() + Send + Sync + 'static,
{
    fn from(notify: F) -> Self {
        Self::new(notify)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.key().0).finish()
    }
}

/// Something that can drop one of its subscriptions.
///
/// Implemented by a store's listener table. Subscriptions only hold a weak
/// reference to it, so they never keep a store alive.
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Handle returned by `subscribe`.
///
/// Dropping a `Subscription` does not unsubscribe; call
/// [`Subscription::unsubscribe`] or convert it with [`Subscription::guard`].
#[must_use = "the subscription can only be revoked through this handle"]
pub struct Subscription {
    target: Option<(Weak<dyn Unsubscribe>, SubscriptionId)>,
}

impl Subscription {
    pub(crate) fn new(target: Weak<dyn Unsubscribe>, id: SubscriptionId) -> Self {
        Self {
            target: Some((target, id)),
        }
    }

    /// A subscription that is not attached to anything.
    ///
    /// Returned when subscribing is refused inside a tracked computation.
    pub fn inert() -> Self {
        Self { target: None }
    }

    /// Whether this handle refers to a real subscription.
    pub fn is_inert(&self) -> bool {
        self.target.is_none()
    }

    /// Remove this subscription from its store.
    ///
    /// Safe to call any number of times, and after the store is gone.
    pub fn unsubscribe(&self) {
        if let Some((target, id)) = &self.target {
            if let Some(target) = target.upgrade() {
                target.unsubscribe(*id);
            }
        }
    }

    /// Turn this subscription into a guard that unsubscribes on drop.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.target.as_ref().map(|(_, id)| *id))
            .finish()
    }
}

/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
