//! Comparators decide whether a write is a no-op.

use std::fmt;
use std::sync::Arc;

/// A shareable equality predicate for store values.
///
/// Returns `true` when the candidate value counts as unchanged.
pub struct Compare<T: ?Sized> {
    eq: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

impl<T: ?Sized + 'static> Compare<T> {
    /// Wrap a custom predicate.
    pub fn new<F>(eq: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self { eq: Arc::new(eq) }
    }

    /// Strict equality. This is the default comparator of a store.
    ///
    /// Stores compare by identity, so a value holding nested stores is
    /// unchanged as long as it holds the same store handles.
    pub fn strict() -> Self
    where
        T: PartialEq,
    {
        Self::new(|prev: &T, next: &T| prev == next)
    }

    /// A comparator that never reports equality. Every write notifies.
    pub fn never() -> Self {
        Self::new(|_: &T, _: &T| false)
    }

    /// Apply the predicate.
    pub fn eq(&self, prev: &T, next: &T) -> bool {
        (self.eq)(prev, next)
    }

    /// Whether two comparators are the same shared predicate.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.eq, &other.eq)
    }
}

impl<T: ?Sized> Clone for Compare<T> {
    fn clone(&self) -> Self {
        Self {
            eq: Arc::clone(&self.eq),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Compare<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compare").finish_non_exhaustive()
    }
}

/// Call-site replacement for a store's comparator.
///
/// Calling `set`/`update` without an override uses the store's own
/// comparator.
pub enum Override<T: ?Sized> {
    /// Ignore the store's comparator and use `PartialEq`.
    Strict,
    /// Use this comparator for the one call.
    Custom(Compare<T>),
}

impl<T: ?Sized + 'static> Override<T> {
    /// The comparator to use in place of the store's own.
    pub(crate) fn into_compare(self) -> Compare<T>
    where
        T: PartialEq,
    {
        match self {
            Override::Strict => Compare::strict(),
            Override::Custom(compare) => compare,
        }
    }
}

impl<T: ?Sized> From<Compare<T>> for Override<T> {
    fn from(compare: Compare<T>) -> Self {
        Override::Custom(compare)
    }
}
