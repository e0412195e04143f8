//! Observable ordered collection.

use crate::changes::Change;
use crate::error::{BridgeError, Result};
use crate::types::ListenerId;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Callback receiving every change of a collection.
pub type Listener<T> = Arc<dyn Fn(&Change<T>) -> Result<()> + Send + Sync>;

struct Inner<T> {
    items: Vec<T>,
    listeners: Vec<(ListenerId, Listener<T>)>,
}

/// A mutable sequence that emits one [`Change`] per mutating call.
///
/// Single writer: the owner mutates it from one logical flow. Clones share
/// the same underlying sequence.
///
/// Listeners run while the collection is locked, in registration order, and
/// must not call back into the collection.
pub struct ObservableCollection<T> {
    inner: Arc<Mutex<Inner<T>>>,
    next_listener: Arc<AtomicU64>,
}

impl<T> Clone for ObservableCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            next_listener: Arc::clone(&self.next_listener),
        }
    }
}

impl<T: Clone + PartialEq> Default for ObservableCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> ObservableCollection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: Vec::new(),
                listeners: Vec::new(),
            })),
            next_listener: Arc::new(AtomicU64::new(1)),
        }
    }

    // --- Queries ---

    /// Snapshot of the current items.
    pub fn items(&self) -> Vec<T> {
        self.inner.lock().items.clone()
    }

    /// Get item count.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the collection holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Whether `item` is present.
    pub fn contains(&self, item: &T) -> bool {
        self.inner.lock().items.contains(item)
    }

    // --- Mutations ---

    /// Append `item` and emit `Add`.
    pub fn add(&self, item: T) {
        let mut inner = self.inner.lock();
        let index = inner.items.len();
        inner.items.push(item.clone());
        Self::notify(&inner, Change::add(item, index));
    }

    /// Remove the first occurrence of `item`. Returns false (and emits
    /// nothing) when it is absent.
    pub fn remove(&self, item: &T) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.items.iter().position(|x| x == item) else {
            return false;
        };
        let removed = inner.items.remove(index);
        Self::notify(&inner, Change::remove(removed, index));
        true
    }

    /// Remove everything. An already empty collection emits nothing.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            return;
        }
        inner.items.clear();
        Self::notify(&inner, Change::clear());
    }

    /// Move the item at `old_index` so that it ends up at `new_index`.
    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let len = inner.items.len();
        for index in [old_index, new_index] {
            if index >= len {
                return Err(BridgeError::IndexOutOfRange { index, len });
            }
        }

        let item = inner.items.remove(old_index);
        inner.items.insert(new_index, item.clone());
        if let Some(change) = Change::moved(item, new_index, old_index) {
            Self::notify(&inner, change);
        }
        Ok(())
    }

    /// Append several items at once. An empty range emits nothing.
    pub fn add_range(&self, items: Vec<T>) {
        let mut inner = self.inner.lock();
        let index = inner.items.len();
        inner.items.extend(items.iter().cloned());
        if let Some(change) = Change::add_range(items, index) {
            Self::notify(&inner, change);
        }
    }

    /// Remove the first occurrence of each item. The emitted change lists
    /// only the items that were actually present.
    pub fn remove_range(&self, items: &[T]) {
        let mut inner = self.inner.lock();
        let mut removed = Vec::with_capacity(items.len());
        for item in items {
            if let Some(index) = inner.items.iter().position(|x| x == item) {
                removed.push(inner.items.remove(index));
            }
        }
        if let Some(change) = Change::remove_range(removed) {
            Self::notify(&inner, change);
        }
    }

    /// Replace the first occurrence of `old` with `new`. Returns false (and
    /// emits nothing) when `old` is absent.
    pub fn replace(&self, old: &T, new: T) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.items.iter().position(|x| x == old) else {
            return false;
        };
        let previous = std::mem::replace(&mut inner.items[index], new.clone());
        Self::notify(&inner, Change::replace(new, previous, index));
        true
    }

    /// Re-emit the first item as a touch signal without structural change.
    pub fn refresh(&self) {
        let inner = self.inner.lock();
        if let Some(first) = inner.items.first() {
            let change = Change::refresh(first.clone(), 0);
            Self::notify(&inner, change);
        }
    }

    // --- Listeners ---

    /// Register `listener` for every later change.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Change<T>) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.allocate_listener_id();
        self.inner.lock().listeners.push((id, Arc::new(listener)));
        id
    }

    /// Hand the current items to `on_snapshot` and register `listener`
    /// under one lock, so no change can fall between the two.
    pub fn listen_with_snapshot<S, F>(&self, on_snapshot: S, listener: F) -> ListenerId
    where
        S: FnOnce(&[T]),
        F: Fn(&Change<T>) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.allocate_listener_id();
        let mut inner = self.inner.lock();
        on_snapshot(&inner.items);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        inner.listeners.len() != before
    }

    /// Get registered listener count.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn allocate_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst))
    }

    /// Deliver to every listener; one failing listener does not stop the rest.
    fn notify(inner: &Inner<T>, change: Change<T>) {
        for (id, listener) in &inner.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = id.0, reason = %change.reason(), error = %e, "collection listener failed")
                }
                Err(_) => {
                    warn!(listener = id.0, reason = %change.reason(), "collection listener panicked")
                }
            }
        }
    }
}
