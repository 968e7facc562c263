//! Watch Context
//!
//! The watch context records which stores a computation reads. While a
//! tracked computation runs, every store read anywhere in its call graph is
//! added to the dependency set of every frame on the stack, so nested
//! watchers each see the reads made on their behalf.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. `WatchContext::enter` pushes a
//! frame and returns a guard; the frame is popped exactly once, either by
//! `finish` or when the guard is dropped during a panic.
//!
//! Each frame also carries a permission. Tracked computations are meant to
//! observe state, so creating, writing and (usually) subscribing to stores
//! inside one is reported through `guard`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::id::StoreId;
use super::listener::{Listener, Subscription};
use super::misuse::Misuse;

/// A store as seen by the watch context: something with an identity that
/// can be subscribed to without knowing its value type.
pub trait Observable: Send + Sync {
    /// The store's identity.
    fn id(&self) -> StoreId;

    /// Subscribe a listener to the store's changes.
    fn subscribe_listener(&self, listener: Listener) -> Subscription;
}

/// Operations a frame may forbid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// Reading only.
    ReadOnly,
    /// Reading and subscribing.
    AllowSubscribeOnly,
}

/// Operations checked by [`WatchContext::guard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Creating a store.
    Create,
    /// Writing a store.
    Write,
    /// Subscribing to a store.
    Subscribe,
}

impl Operation {
    /// The misuse reported when this operation is not permitted, if any.
    fn misuse(self, permission: Permission) -> Option<Misuse> {
        match self {
            Operation::Create => Some(Misuse::CreateWhileTracking),
            Operation::Write => Some(Misuse::WriteWhileTracking),
            Operation::Subscribe if permission < Permission::AllowSubscribeOnly => {
                Some(Misuse::SubscribeWhileTracking)
            }
            Operation::Subscribe => None,
        }
    }

    /// Whether the operation still runs after being reported.
    fn proceeds_anyway(self) -> bool {
        matches!(self, Operation::Create)
    }
}

/// The stores read during a tracked computation, in first-read order.
#[derive(Clone, Default)]
pub struct Dependencies {
    stores: IndexMap<StoreId, Arc<dyn Observable>>,
}

impl Dependencies {
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn contains(&self, id: StoreId) -> bool {
        self.stores.contains_key(&id)
    }

    /// Identities of the stores read.
    pub fn ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.keys().copied()
    }

    /// The stores read, type-erased.
    pub fn iter(&self) -> impl Iterator<Item = (StoreId, &Arc<dyn Observable>)> + '_ {
        self.stores.iter().map(|(id, store)| (*id, store))
    }

    /// Subscribe one listener to every store read.
    pub fn subscribe(&self, listener: &Listener) -> Vec<Subscription> {
        self.stores
            .values()
            .map(|store| store.subscribe_listener(listener.clone()))
            .collect()
    }

    fn insert(&mut self, store: &Arc<dyn Observable>) {
        self.stores
            .entry(store.id())
            .or_insert_with(|| Arc::clone(store));
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.stores.keys()).finish()
    }
}

/// A frame on the watch stack.
struct Frame {
    serial: u64,
    permission: Permission,
    dependencies: Dependencies,
}

thread_local! {
    static FRAMES: RefCell<SmallVec<[Frame; 4]>> = RefCell::new(SmallVec::new());
    static NEXT_SERIAL: Cell<u64> = const { Cell::new(0) };
}

/// Guard for one frame of the watch stack.
///
/// The frame is popped when the guard is finished or dropped.
pub struct WatchContext {
    serial: u64,
    popped: bool,
}

impl WatchContext {
    /// Push a new frame with the given permission.
    pub fn enter(permission: Permission) -> Self {
        let serial = NEXT_SERIAL.with(|next| {
            let serial = next.get();
            next.set(serial + 1);
            serial
        });

        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                serial,
                permission,
                dependencies: Dependencies::default(),
            });
        });

        Self {
            serial,
            popped: false,
        }
    }

    /// Pop the frame and return what it recorded.
    pub fn finish(mut self) -> Dependencies {
        self.popped = true;
        self.pop()
    }

    fn pop(&self) -> Dependencies {
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            match popped {
                Some(frame) => {
                    debug_assert_eq!(
                        frame.serial, self.serial,
                        "WatchContext mismatch: expected frame {}, got {}",
                        self.serial, frame.serial
                    );
                    frame.dependencies
                }
                None => Dependencies::default(),
            }
        })
    }

    /// Run `computation` in a read-only frame.
    ///
    /// Returns the result and the stores read while it ran.
    pub fn track<F, R>(computation: F) -> (R, Dependencies)
    where
        F: FnOnce() -> R,
    {
        Self::track_with(Permission::ReadOnly, computation)
    }

    /// Run `computation` in a frame with the given permission.
    pub fn track_with<F, R>(permission: Permission, computation: F) -> (R, Dependencies)
    where
        F: FnOnce() -> R,
    {
        let frame = Self::enter(permission);
        let result = computation();
        (result, frame.finish())
    }

    /// Check if any frame is active.
    pub fn is_tracking() -> bool {
        FRAMES.with(|frames| !frames.borrow().is_empty())
    }

    /// The strictest permission on the stack, if any frame is active.
    pub fn permission() -> Option<Permission> {
        FRAMES.with(|frames| frames.borrow().iter().map(|frame| frame.permission).min())
    }

    /// Record a read of `store` into every active frame.
    pub fn register_read(store: &Arc<dyn Observable>) {
        FRAMES.with(|frames| {
            for frame in frames.borrow_mut().iter_mut() {
                frame.dependencies.insert(store);
            }
        });
    }

    /// Check whether `operation` may run under the current stack.
    ///
    /// Returns `true` when the caller should go ahead. When the operation
    /// is not permitted a warning is emitted; creation is reported but
    /// still allowed.
    pub fn guard(operation: Operation, store: Option<StoreId>) -> bool {
        let Some(permission) = Self::permission() else {
            return true;
        };

        match operation.misuse(permission) {
            Some(misuse) => {
                misuse.report(store);
                operation.proceeds_anyway()
            }
            None => true,
        }
    }
}

impl Drop for WatchContext {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}

/// Run `computation` in a read-only frame. See [`WatchContext::track`].
pub fn track<F, R>(computation: F) -> (R, Dependencies)
where
    F: FnOnce() -> R,
{
    WatchContext::track(computation)
}
