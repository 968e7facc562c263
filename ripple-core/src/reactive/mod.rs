//! Reactive Primitives
//!
//! This module implements the core of Ripple: stores, batched transactions
//! and dependency tracking.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A Store is an identified, mutable container for one value plus a set of
//! listeners. Writing a value that differs from the current one (under the
//! store's comparator) notifies the listeners. A store's value may hold
//! other stores; each is independently writable and subscribable.
//!
//! ## Batches
//!
//! A batch defers and deduplicates listener delivery until the outermost
//! batch exits. Every write is its own batch, so writes made from inside
//! another write's transform, including writes to nested stores, are
//! delivered together, once per listener.
//!
//! ## Tracking
//!
//! `track` runs a computation and returns the set of stores it read. While
//! a computation is tracked it is expected to be read-only: writes are
//! refused, subscriptions are refused unless the frame allows them, and
//! creating stores is reported. Misuse is a `tracing` warning, never an
//! error returned to the caller.
//!
//! ## Watchers
//!
//! A Watcher builds on tracking: it keeps a derived value subscribed to
//! exactly the stores its latest run read.
//!
//! # Implementation Notes
//!
//! The batch and watch contexts live in thread-local storage. State
//! mutation is assumed to be single-threaded; store handles may move
//! between threads, but each thread batches and tracks on its own.

mod batch;
mod compare;
mod context;
mod id;
mod listener;
mod misuse;
mod store;
mod watcher;

pub use batch::{batch, is_batching};
pub use compare::{Compare, Override};
pub use context::{track, Dependencies, Observable, Operation, Permission, WatchContext};
pub use id::{StoreId, SubscriptionId};
pub use listener::{Listener, Subscription, SubscriptionGuard};
pub use misuse::Misuse;
pub use store::Store;
pub use watcher::Watcher;
