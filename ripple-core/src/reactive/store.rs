//! Store Implementation
//!
//! A Store is the fundamental reactive container. It holds one value and a
//! table of listeners.
//!
//! # How Stores Work
//!
//! 1. Reading a store inside a tracked computation records the store as a
//!    dependency of every active watch frame.
//!
//! 2. Writing a store opens a batch, computes the candidate value and
//!    compares it to the current one. Equal values are a complete no-op.
//!    Otherwise the value is replaced and the store's listeners are queued
//!    on the batch, which delivers them when the outermost batch exits.
//!
//! 3. Writes, and usually subscriptions, are refused inside tracked
//!    computations. Creation is reported but allowed.
//!
//! # Composition
//!
//! `Store<T>` is a handle. Cloning the handle gives another handle to the
//! same store, which is how a store's value holds nested stores by
//! reference. Stores compare equal by identity, so a value containing
//! nested stores is unchanged as long as it holds the same handles.
//!
//! `fork` creates a new store with a new identity. It is shallow: nested
//! stores inside the value are shared unless the transform passed to
//! `fork_with` forks them too.
//!
//! # Locking
//!
//! The value is kept as an `Arc<T>` behind a `parking_lot::RwLock`. The lock
//! is only held to take or replace that `Arc`, never while user code runs.
//! `with`, `update` and `fork_with` hand their closure a snapshot, so the
//! closure may write this store, or a nested store whose listeners write
//! this store, without blocking.
//!
//! A write made from inside this store's own transform applies first. The
//! outer write then compares its candidate against the value as it stands
//! after that inner write.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::batch::{self, batch};
use super::compare::{Compare, Override};
use super::context::{Observable, Operation, WatchContext};
use super::id::{StoreId, SubscriptionId};
use super::listener::{Listener, Subscription, Unsubscribe};

/// A reactive store holding a value of type T.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Store;
///
/// let count = Store::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.update(|value| value + 1);
/// assert_eq!(count.get(), 1);
/// ```
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    /// Unique identifier for this store.
    id: StoreId,

    /// The current value.
    value: RwLock<Arc<T>>,

    /// Comparator fixed at construction.
    compare: Compare<T>,

    /// Listeners by subscription. Shared with `Subscription` handles through
    /// a weak reference.
    listeners: Arc<ListenerTable>,
}

#[derive(Default)]
struct ListenerTable {
    entries: Mutex<IndexMap<SubscriptionId, Listener>>,
}

impl Unsubscribe for ListenerTable {
    fn unsubscribe(&self, id: SubscriptionId) {
        self.entries.lock().shift_remove(&id);
    }
}

impl<T> StoreInner<T>
where
    T: Send + Sync + 'static,
{
    fn subscribe(&self, listener: Listener) -> Subscription {
        if !WatchContext::guard(Operation::Subscribe, Some(self.id)) {
            return Subscription::inert();
        }

        let id = SubscriptionId::next();
        self.listeners.entries.lock().insert(id, listener);

        let table: Weak<ListenerTable> = Arc::downgrade(&self.listeners);
        let table: Weak<dyn Unsubscribe> = table;
        Subscription::new(table, id)
    }
}

impl<T> Observable for StoreInner<T>
where
    T: Send + Sync + 'static,
{
    fn id(&self) -> StoreId {
        self.id
    }

    fn subscribe_listener(&self, listener: Listener) -> Subscription {
        self.subscribe(listener)
    }
}

impl<T> Store<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new store compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_compare(value, Compare::strict())
    }

    /// Create a new store with a custom comparator.
    pub fn with_compare(value: T, compare: Compare<T>) -> Self {
        let id = StoreId::next();
        WatchContext::guard(Operation::Create, Some(id));

        Self {
            inner: Arc::new(StoreInner {
                id,
                value: RwLock::new(Arc::new(value)),
                compare,
                listeners: Arc::new(ListenerTable::default()),
            }),
        }
    }

    /// Get the store's unique ID.
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// The comparator this store was created with.
    pub fn compare(&self) -> &Compare<T> {
        &self.inner.compare
    }

    /// The current value, without tracking. The lock is released on return.
    fn snapshot(&self) -> Arc<T> {
        Arc::clone(&*self.inner.value.read())
    }

    /// Record this store as a dependency of the active watch frames.
    fn track(&self) {
        if WatchContext::is_tracking() {
            let erased: Arc<dyn Observable> = self.inner.clone();
            WatchContext::register_read(&erased);
        }
    }

    /// Get the current value.
    ///
    /// Inside a tracked computation this also records the store as a
    /// dependency.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        T::clone(&self.snapshot())
    }

    /// Project the current value without cloning it.
    ///
    /// Tracks like [`Store::get`]. Writes made by `f` are delivered together
    /// once `f` returns.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.track();
        let value = self.snapshot();
        batch(|| f(&*value))
    }

    /// Get the current value without tracking dependencies.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.snapshot())
    }

    /// Set a new value.
    ///
    /// Does nothing if the store's comparator reports the value as equal to
    /// the current one.
    pub fn set(&self, value: T) {
        self.write(|_| value, None);
    }

    /// Update the value using a function of the current value.
    ///
    /// Writes made by `f` to other stores, including stores nested in this
    /// store's value, are delivered together with this write.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.write(f, None);
    }

    /// Set a new value, comparing with `compare` instead of the store's
    /// comparator.
    pub fn set_with(&self, value: T, compare: impl Into<Override<T>>)
    where
        T: PartialEq,
    {
        self.write(|_| value, Some(compare.into().into_compare()));
    }

    /// Update the value, comparing with `compare` instead of the store's
    /// comparator.
    pub fn update_with<F>(&self, f: F, compare: impl Into<Override<T>>)
    where
        F: FnOnce(&T) -> T,
        T: PartialEq,
    {
        self.write(f, Some(compare.into().into_compare()));
    }

    fn write<F>(&self, next: F, compare: Option<Compare<T>>)
    where
        F: FnOnce(&T) -> T,
    {
        if !WatchContext::guard(Operation::Write, Some(self.inner.id)) {
            return;
        }

        batch(|| {
            let candidate = next(&*self.snapshot());

            let compare = compare.as_ref().unwrap_or(&self.inner.compare);
            let _previous = {
                let mut value = self.inner.value.write();
                if compare.eq(&**value, &candidate) {
                    return;
                }
                std::mem::replace(&mut *value, Arc::new(candidate))
            };

            let listeners = self.inner.listeners.entries.lock();
            batch::enqueue(listeners.values());
        });
    }

    /// Subscribe to value changes.
    ///
    /// Each call creates a separate subscription, even for the same
    /// listener. Inside a read-only tracked computation the call is refused
    /// and an inert subscription is returned.
    pub fn subscribe(&self, listener: impl Into<Listener>) -> Subscription {
        self.inner.subscribe(listener.into())
    }

    /// Get the number of subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.entries.lock().len()
    }

    /// Create a new store holding a copy of the current value.
    ///
    /// The new store has a new identity and the same comparator. Nested
    /// stores in the value are shared with this store.
    pub fn fork(&self) -> Self
    where
        T: Clone,
    {
        Self::with_compare(T::clone(&self.snapshot()), self.inner.compare.clone())
    }

    /// Create a new store from a transform of the current value.
    pub fn fork_with<F>(&self, transform: F) -> Self
    where
        F: FnOnce(&T) -> T,
    {
        let value = transform(&*self.snapshot());
        Self::with_compare(value, self.inner.compare.clone())
    }

    /// Create a new store from a transform of the current value, with a
    /// different comparator.
    pub fn fork_with_compare<F>(&self, transform: F, compare: impl Into<Override<T>>) -> Self
    where
        F: FnOnce(&T) -> T,
        T: PartialEq,
    {
        let value = transform(&*self.snapshot());
        Self::with_compare(value, compare.into().into_compare())
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Store<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Store<T> {}

impl<T> Hash for Store<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> Debug for Store<T>
where
    T: Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("value", &*self.snapshot())
            .field("subscriber_count", &self.inner.listeners.entries.lock().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::track;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i32,
    }

    fn inc(counter: &Counter) -> Counter {
        Counter {
            count: counter.count + 1,
        }
    }

    fn counting() -> (Listener, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let listener = Listener::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    #[test]
    fn store_get_and_set() {
        let store = Store::new(0);
        assert_eq!(store.get(), 0);

        store.set(42);
        assert_eq!(store.get(), 42);
    }

    #[test]
    fn store_update() {
        let store = Store::new(10);
        store.update(|v| v + 5);
        assert_eq!(store.get(), 15);
    }

    #[test]
    fn store_with_projects_value() {
        let store = Store::new(Counter { count: 3 });
        assert_eq!(store.with(|counter| counter.count), 3);
    }

    #[test]
    fn store_notifies_subscribers() {
        let store = Store::new(0);
        let (listener, count) = counting();

        let _subscription = store.subscribe(listener);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        store.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        store.set(2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let store = Store::new(Counter { count: 0 });
        let (listener, count) = counting();
        let _subscription = store.subscribe(listener);

        store.set(Counter { count: 0 });
        store.update(|counter| counter.clone());

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn store_unsubscribe() {
        let store = Store::new(0);
        let (listener, count) = counting();

        let subscription = store.subscribe(listener);
        store.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        store.set(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_removes_only_its_own_entry() {
        let store = Store::new(0);
        let (listener, count) = counting();

        let first = store.subscribe(listener.clone());
        let _second = store.subscribe(listener);
        assert_eq!(store.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_comparator() {
        let store = Store::with_compare(
            Counter { count: 0 },
            Compare::new(|a: &Counter, b: &Counter| a.count / 10 == b.count / 10),
        );
        let (listener, count) = counting();
        let _subscription = store.subscribe(listener);

        store.set(Counter { count: 5 });
        assert_eq!(store.get().count, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        store.set(Counter { count: 12 });
        assert_eq!(store.get().count, 12);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_site_comparator_overrides_store_comparator() {
        let store = Store::with_compare(Counter { count: 0 }, Compare::new(|_: &Counter, _: &Counter| true));

        store.update(inc);
        assert_eq!(store.get().count, 0);

        store.update_with(inc, Override::Strict);
        assert_eq!(store.get().count, 1);

        store.set_with(Counter { count: 1 }, Compare::<Counter>::never());
        assert_eq!(store.get().count, 1);

        store.update_with(inc, Compare::new(|_: &Counter, _: &Counter| true));
        assert_eq!(store.get().count, 1);
    }

    #[test]
    fn update_may_write_the_same_store() {
        let store = Store::new(0);
        let (listener, count) = counting();
        let _subscription = store.subscribe(listener);

        let inner = store.clone();
        store.update(move |value| {
            inner.set(100);
            assert_eq!(inner.peek(), 100);
            value + 1
        });

        assert_eq!(store.get(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_defers_writes_until_it_returns() {
        let store = Store::new(0);
        let (listener, count) = counting();
        let _subscription = store.subscribe(listener);

        let same = store.clone();
        store.with(|_| {
            same.set(1);
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_registers_dependency() {
        let store = Store::new(1);
        let (value, deps) = track(|| store.get() + 1);

        assert_eq!(value, 2);
        assert!(deps.contains(store.id()));
    }

    #[test]
    fn with_registers_dependency() {
        let store = Store::new(Counter { count: 1 });
        let (count, deps) = track(|| store.with(|counter| counter.count));

        assert_eq!(count, 1);
        assert!(deps.contains(store.id()));
    }

    #[test]
    fn peek_does_not_register_dependency() {
        let store = Store::new(1);
        let (value, deps) = track(|| store.peek());

        assert_eq!(value, 1);
        assert!(deps.is_empty());
    }

    #[test]
    fn write_inside_tracking_is_ignored() {
        let store = Store::new(0);
        let (listener, count) = counting();
        let _subscription = store.subscribe(listener);

        track(|| store.set(1));

        assert_eq!(store.get(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribe_inside_tracking_is_inert() {
        let store = Store::new(0);
        let (subscription, _) = track(|| store.subscribe(|| {}));

        assert!(subscription.is_inert());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn create_inside_tracking_still_creates() {
        let (store, _) = track(|| Store::new(5));
        assert_eq!(store.get(), 5);
    }

    #[test]
    fn handle_clone_shares_state() {
        let store1 = Store::new(0);
        let store2 = store1.clone();

        store1.set(42);
        assert_eq!(store2.get(), 42);
        assert_eq!(store1, store2);
        assert_eq!(store1.id(), store2.id());
    }

    #[test]
    fn fork_has_new_identity_and_copied_value() {
        let store1 = Store::new(Counter { count: 0 });
        let store2 = store1.fork();

        assert_ne!(store1, store2);
        assert_ne!(store1.id(), store2.id());
        assert_eq!(store1.get(), store2.get());
        assert!(store1.compare().ptr_eq(store2.compare()));

        store1.update(inc);
        assert_eq!(store2.get().count, 0);
    }

    #[test]
    fn fork_with_transform() {
        let store1 = Store::new(Counter { count: 1 });
        let store2 = store1.fork_with(inc);

        assert_eq!(store1.get().count, 1);
        assert_eq!(store2.get().count, 2);
    }

    #[test]
    fn fork_with_compare_replaces_comparator() {
        let store1 = Store::new(Counter { count: 1 });
        let never = Compare::<Counter>::never();
        let store2 = store1.fork_with_compare(Counter::clone, never.clone());

        assert!(store2.compare().ptr_eq(&never));
        assert!(!store1.compare().ptr_eq(store2.compare()));
    }

    #[test]
    fn store_ids_are_unique() {
        let s1 = Store::new(0);
        let s2 = Store::new(0);
        let s3 = Store::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn id_is_stable_across_operations() {
        let store = Store::new(Counter { count: 0 });
        let id = store.id();

        store.get();
        store.update(inc);
        let _subscription = store.subscribe(|| {});
        let _fork = store.fork();

        assert_eq!(store.id(), id);
    }

    #[test]
    fn debug_shows_value() {
        let store = Store::new(7);
        let rendered = format!("{store:?}");
        assert!(rendered.contains("value: 7"));
    }
}
