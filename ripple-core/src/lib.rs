//! Ripple Core
//!
//! This crate provides the core of the Ripple reactive state engine.
//! It implements:
//!
//! - Stores: identified, mutable value containers with change listeners
//! - Batches: nested transactions that deliver each listener once
//! - Dependency tracking: recording which stores a computation reads
//! - Watchers: derived values kept subscribed to their live dependencies
//!
//! # Architecture
//!
//! Everything lives in the `reactive` module. The batch and watch contexts
//! are thread-local; stores are shareable handles.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{batch, Store};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Clone, PartialEq)]
//! struct Counter {
//!     count: u32,
//! }
//!
//! let store = Store::new(Counter { count: 0 });
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let subscription = {
//!     let calls = calls.clone();
//!     store.subscribe(move || {
//!         calls.fetch_add(1, Ordering::SeqCst);
//!     })
//! };
//!
//! // Both updates are delivered together
//! batch(|| {
//!     store.update(|c| Counter { count: c.count + 1 });
//!     store.update(|c| Counter { count: c.count + 1 });
//! });
//!
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! assert_eq!(store.get().count, 2);
//!
//! subscription.unsubscribe();
//! ```

pub mod reactive;
