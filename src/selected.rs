//! The selected-key set consumer view.

use std::collections::hash_map::{self, HashMap};
use std::fmt;

use parking_lot::MutexGuard;

use crate::key::Key;
use crate::token::Token;

/// Internal storage for the selected-key set.
///
/// Only selection cycles insert; consumers mutate through [`SelectedKeys`].
pub(crate) struct SelectedSet {
    map: HashMap<Token, Key>,
}

impl SelectedSet {
    pub(crate) fn new() -> SelectedSet {
        SelectedSet {
            map: HashMap::new(),
        }
    }

    pub(crate) fn contains_token(&self, token: Token) -> bool {
        self.map.contains_key(&token)
    }

    pub(crate) fn insert(&mut self, key: Key) {
        self.map.insert(key.token(), key);
    }

    pub(crate) fn remove_token(&mut self, token: Token) -> bool {
        self.map.remove(&token).is_some()
    }

    /// Removes and returns an arbitrary element, used by consumption passes.
    pub(crate) fn pop(&mut self) -> Option<Key> {
        let token = self.map.keys().next().copied()?;
        self.map.remove(&token)
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// A locked view of a selector's selected-key set.
///
/// Returned by [`Selector::selected_keys`]. Keys enter the set only through
/// selection cycles; this view supports every removal shape but no insertion.
/// The view holds the set's lock: drop it before invoking a selection
/// operation on the same thread, or that operation will block on the lock.
///
/// Removing a key does not clear its ready set. Stale ready bits on a removed
/// key are discarded the next time a cycle re-inserts it.
///
/// # Examples
///
/// ```
/// use muxio::{Ops, Selector, SignalPoller};
///
/// # fn main() -> muxio::Result<()> {
/// let poller = SignalPoller::new();
/// let (endpoint, readiness) = poller.readiness();
/// let selector = Selector::new(poller.clone());
///
/// let key = selector.register(endpoint, Ops::readable())?;
/// readiness.set_readiness(Ops::readable());
/// selector.select_now()?;
///
/// let mut selected = selector.selected_keys()?;
/// assert!(selected.contains(&key));
/// selected.retain(|key| !key.ready().is_readable());
/// assert!(selected.is_empty());
/// # Ok(())
/// # }
/// ```
///
/// [`Selector::selected_keys`]: struct.Selector.html#method.selected_keys
pub struct SelectedKeys<'a> {
    guard: MutexGuard<'a, SelectedSet>,
}

impl<'a> SelectedKeys<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, SelectedSet>) -> SelectedKeys<'a> {
        SelectedKeys { guard }
    }

    /// Returns the number of selected keys.
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// Returns true if no key is currently selected.
    pub fn is_empty(&self) -> bool {
        self.guard.len() == 0
    }

    /// Returns true if `key` is in the set.
    pub fn contains(&self, key: &Key) -> bool {
        self.guard.contains_token(key.token())
    }

    /// Iterates over the selected keys.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.guard.map.values(),
        }
    }

    /// Removes `key` from the set. Returns whether it was present.
    pub fn remove(&mut self, key: &Key) -> bool {
        self.guard.remove_token(key.token())
    }

    /// Keeps only the keys for which `f` returns true.
    ///
    /// This is the iterate-and-remove shape: inspect each key, drop the ones
    /// that have been consumed.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&Key) -> bool,
    {
        self.guard.map.retain(|_, key| f(key));
    }

    /// Removes every key from the set, returning them.
    pub fn drain(&mut self) -> Vec<Key> {
        self.guard.map.drain().map(|(_, key)| key).collect()
    }

    /// Removes every key from the set.
    pub fn clear(&mut self) {
        self.guard.clear();
    }
}

impl<'a> fmt::Debug for SelectedKeys<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the keys in a [`SelectedKeys`] view.
///
/// [`SelectedKeys`]: struct.SelectedKeys.html
pub struct Iter<'a> {
    inner: hash_map::Values<'a, Token, Key>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Key;

    fn next(&mut self) -> Option<&'a Key> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> fmt::Debug for Iter<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.pad("Iter")
    }
}
