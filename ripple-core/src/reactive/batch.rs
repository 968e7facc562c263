//! Batch Context
//!
//! A batch is a dynamic scope across which listener delivery is deferred
//! and deduplicated. Batches nest: only the outermost one flushes.
//!
//! # How Batching Works
//!
//! 1. Entering a batch increments a thread-local depth counter.
//!
//! 2. A store whose value changes adds its listeners to the pending set.
//!    The set is keyed by listener identity, so a listener reached through
//!    several stores or several writes is queued once.
//!
//! 3. When the depth returns to zero the pending set is drained and every
//!    listener runs once, after every write of the outer call is applied.
//!
//! Every store write opens its own batch, so a lone write flushes
//! synchronously while writes made from inside another write's transform
//! are deferred to the outer one.
//!
//! # Listener Failures
//!
//! A panicking listener does not stop the flush. Each listener runs under
//! `catch_unwind`; once all have run, the first panic is resumed.
//!
//! If the body of the outermost batch panics, the writes it already applied
//! stay applied, so their listeners are still delivered while the panic
//! unwinds. Listener panics raised during that delivery are logged and
//! dropped.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;

use super::listener::{Listener, ListenerKey};

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: IndexMap<ListenerKey, Listener>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Guard for one level of batching.
///
/// `exit` flushes when this was the outermost level. If the guard is
/// dropped without `exit` (the body panicked) the depth is still restored
/// and pending listeners of the outermost level are delivered without
/// resuming their panics.
struct BatchScope {
    exited: bool,
}

impl BatchScope {
    fn enter() -> Self {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        Self { exited: false }
    }

    fn exit(mut self) {
        self.exited = true;
        if let Some(listeners) = leave() {
            flush(listeners);
        }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if let Some(listeners) = leave() {
            if !listeners.is_empty() {
                tracing::warn!(
                    listeners = listeners.len(),
                    "batch unwound by a panic; delivering pending listeners"
                );
                // Already unwinding, so a listener panic is only logged.
                let _ = deliver(listeners);
            }
        }
    }
}

/// Decrement the depth. Returns the drained pending set if this closed the
/// outermost batch.
fn leave() -> Option<Vec<Listener>> {
    BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        debug_assert!(batch.depth > 0, "batch depth underflow");
        batch.depth = batch.depth.saturating_sub(1);
        if batch.depth == 0 {
            Some(batch.pending.drain(..).map(|(_, listener)| listener).collect())
        } else {
            None
        }
    })
}

/// Invoke each listener once, then resume the first panic if any.
fn flush(listeners: Vec<Listener>) {
    if listeners.is_empty() {
        return;
    }

    tracing::trace!(listeners = listeners.len(), "flushing batch");

    if let Some(payload) = deliver(listeners) {
        panic::resume_unwind(payload);
    }
}

/// Invoke each listener once, isolating panics. Returns the first panic.
fn deliver(listeners: Vec<Listener>) -> Option<Box<dyn Any + Send>> {
    let mut first_panic: Option<Box<dyn Any + Send>> = None;

    for listener in listeners {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.notify())) {
            tracing::error!(
                listener = ?listener,
                panic = panic_message(payload.as_ref()),
                "listener panicked during flush"
            );
            first_panic.get_or_insert(payload);
        }
    }

    first_panic
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Queue listeners for the current batch.
///
/// Must be called inside a batch; stores only enqueue from within the
/// batch their write opened.
pub(crate) fn enqueue<'a, I>(listeners: I)
where
    I: IntoIterator<Item = &'a Listener>,
{
    BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        debug_assert!(batch.depth > 0, "listeners queued outside a batch");
        for listener in listeners {
            batch
                .pending
                .entry(listener.key())
                .or_insert_with(|| listener.clone());
        }
    });
}

/// Run `body` as a transaction.
///
/// Store writes inside `body`, including writes made by nested transforms
/// and nested `batch` calls, notify their listeners once, after `body`
/// returns from the outermost `batch`.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{batch, Store};
///
/// let first = Store::new(1);
/// let second = Store::new(2);
///
/// batch(|| {
///     first.set(10);
///     second.set(20);
/// });
///
/// assert_eq!(first.get() + second.get(), 30);
/// ```
pub fn batch<F, R>(body: F) -> R
where
    F: FnOnce() -> R,
{
    let scope = BatchScope::enter();
    let result = body();
    scope.exit();
    result
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|batch| batch.borrow().depth > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting() -> (Listener, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let listener = Listener::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    fn pending_len() -> usize {
        BATCH.with(|batch| batch.borrow().pending.len())
    }

    #[test]
    fn batch_returns_body_result() {
        assert_eq!(batch(|| 42), 42);
        assert!(!is_batching());
    }

    #[test]
    fn flushes_when_outermost_batch_exits() {
        let (listener, count) = counting();

        batch(|| {
            enqueue([&listener]);
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(pending_len(), 0);
    }

    #[test]
    fn deduplicates_by_listener_identity() {
        let (listener, count) = counting();
        let same = listener.clone();

        batch(|| {
            enqueue([&listener, &same]);
            enqueue([&listener]);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_batches_defer_to_outermost() {
        let (first, first_count) = counting();
        let (second, second_count) = counting();

        batch(|| {
            enqueue([&first]);
            batch(|| {
                assert!(is_batching());
                enqueue([&second]);
            });
            assert_eq!(first_count.load(Ordering::SeqCst), 0);
            assert_eq!(second_count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_starve_siblings() {
        let (before, before_count) = counting();
        let failing = Listener::new(|| panic!("listener failed"));
        let (after, after_count) = counting();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| enqueue([&before, &failing, &after]));
        }));

        assert!(result.is_err());
        assert_eq!(before_count.load(Ordering::SeqCst), 1);
        assert_eq!(after_count.load(Ordering::SeqCst), 1);
        assert!(!is_batching());
        assert_eq!(pending_len(), 0);
    }

    #[test]
    fn panicking_body_restores_depth_and_delivers_pending() {
        let (listener, count) = counting();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                enqueue([&listener]);
                panic!("body failed");
            })
        }));

        assert!(result.is_err());
        assert!(!is_batching());
        assert_eq!(pending_len(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_nested_body_delivers_at_outermost() {
        let (listener, count) = counting();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                batch(|| {
                    enqueue([&listener]);
                    panic!("inner body failed");
                });
            })
        }));

        assert!(result.is_err());
        assert!(!is_batching());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_panic_while_unwinding_is_not_resumed() {
        let failing = Listener::new(|| panic!("listener failed"));
        let (after, after_count) = counting();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                enqueue([&failing, &after]);
                panic!("body failed");
            })
        }));

        let payload = result.err().map(|payload| panic_message(payload.as_ref()).to_owned());
        assert_eq!(payload.as_deref(), Some("body failed"));
        assert_eq!(after_count.load(Ordering::SeqCst), 1);
        assert!(!is_batching());
    }

    #[test]
    fn panic_message_extraction() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
