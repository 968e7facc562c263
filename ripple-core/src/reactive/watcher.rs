//! Watcher Implementation
//!
//! A Watcher keeps a derived value in sync with the stores it reads.
//!
//! # How Watchers Work
//!
//! 1. When created, the watcher runs its computation under `track` and
//!    subscribes one listener to exactly the stores it read.
//!
//! 2. When any of those stores changes, the listener re-runs the
//!    computation, again under `track`.
//!
//! 3. After re-running, the subscriptions are brought in line with the new
//!    dependency set: stores no longer read are unsubscribed, newly read
//!    stores are subscribed, and the rest are left alone.
//!
//! 4. The new result is compared with the previous one. Only when they
//!    differ is the result stored and `on_change` invoked.
//!
//! The same listener is subscribed to every dependency, so a batch that
//! changes several dependencies re-runs the computation once.
//!
//! # Cleanup
//!
//! Dropping the watcher (or calling `dispose`) releases every subscription.
//! Stores only hold a weak reference back to the watcher.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::compare::Compare;
use super::context::{Dependencies, WatchContext};
use super::id::StoreId;
use super::listener::{Listener, Subscription};

/// A computation re-run whenever the stores it reads change.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Store, Watcher};
///
/// let first = Store::new(1);
/// let second = Store::new(2);
///
/// let sum = {
///     let (first, second) = (first.clone(), second.clone());
///     Watcher::new(move || first.get() + second.get(), || {})
/// };
/// assert_eq!(sum.get(), 3);
///
/// first.set(10);
/// assert_eq!(sum.get(), 12);
/// ```
pub struct Watcher<R> {
    inner: Arc<WatcherInner<R>>,
}

struct WatcherInner<R> {
    /// The watched computation.
    compute: Box<dyn Fn() -> R + Send + Sync>,

    /// Decides whether a new result counts as a change.
    compare: Compare<R>,

    /// Invoked after the result changes.
    on_change: Listener,

    /// Subscribed to every dependency. Holds a weak reference to this
    /// watcher.
    dependency_listener: Listener,

    state: Mutex<WatcherState<R>>,

    disposed: AtomicBool,

    /// Number of times the computation has run.
    run_count: AtomicUsize,
}

struct WatcherState<R> {
    value: R,
    subscriptions: IndexMap<StoreId, Subscription>,
}

impl<R> Watcher<R>
where
    R: Send + 'static,
{
    /// Create a watcher whose results are compared with `PartialEq`.
    ///
    /// The computation runs immediately to establish its dependencies.
    pub fn new<F>(compute: F, on_change: impl Into<Listener>) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: PartialEq,
    {
        Self::with_compare(compute, Compare::strict(), on_change)
    }

    /// Create a watcher with a custom result comparator.
    pub fn with_compare<F>(compute: F, compare: Compare<R>, on_change: impl Into<Listener>) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        let (value, dependencies) = WatchContext::track(|| compute());

        let inner = Arc::new_cyclic(|weak: &Weak<WatcherInner<R>>| {
            let weak = weak.clone();
            WatcherInner {
                compute: Box::new(compute),
                compare,
                on_change: on_change.into(),
                dependency_listener: Listener::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.rerun();
                    }
                }),
                state: Mutex::new(WatcherState {
                    value,
                    subscriptions: IndexMap::new(),
                }),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(1),
            }
        });

        inner.resubscribe(&mut inner.state.lock(), &dependencies);

        Self { inner }
    }

    /// The latest result.
    pub fn get(&self) -> R
    where
        R: Clone,
    {
        self.inner.state.lock().value.clone()
    }

    /// The stores the latest run read, in first-read order.
    pub fn dependencies(&self) -> Vec<StoreId> {
        self.inner.state.lock().subscriptions.keys().copied().collect()
    }

    /// Get the number of times the computation has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Stop watching and release every subscription.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the watcher has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<R> WatcherInner<R>
where
    R: Send + 'static,
{
    fn rerun(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let (value, dependencies) = WatchContext::track(|| (self.compute)());
        self.run_count.fetch_add(1, Ordering::SeqCst);

        let changed = {
            let mut state = self.state.lock();
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }
            self.resubscribe(&mut state, &dependencies);

            let changed = !self.compare.eq(&state.value, &value);
            if changed {
                state.value = value;
            }
            changed
        };

        if changed {
            tracing::trace!(dependencies = dependencies.len(), "watched value changed");
            self.on_change.notify();
        }
    }

    /// Subscribe to exactly `dependencies`.
    fn resubscribe(&self, state: &mut WatcherState<R>, dependencies: &Dependencies) {
        state.subscriptions.retain(|id, subscription| {
            let keep = dependencies.contains(*id);
            if !keep {
                subscription.unsubscribe();
            }
            keep
        });

        for (id, store) in dependencies.iter() {
            if !state.subscriptions.contains_key(&id) {
                let subscription = store.subscribe_listener(self.dependency_listener.clone());
                state.subscriptions.insert(id, subscription);
            }
        }
    }
}

impl<R> WatcherInner<R> {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        for (_, subscription) in self.state.lock().subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl<R> Drop for Watcher<R> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<R> fmt::Debug for Watcher<R>
where
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Watcher")
            .field("value", &state.value)
            .field("dependencies", &state.subscriptions.keys().collect::<Vec<_>>())
            .field("run_count", &self.inner.run_count.load(Ordering::SeqCst))
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
