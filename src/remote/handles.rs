//! Handle table for objects owned by the remote runtime.

use crate::error::{BridgeError, Result};
use crate::types::HandleId;
use std::collections::HashMap;

/// Maps generated ids to owned objects.
///
/// Every insert yields a fresh id and ids are never reused, so a handle
/// cannot alias a later object. Removing an absent id reports
/// `AlreadyDisposed`.
pub struct HandleTable<V> {
    entries: HashMap<HandleId, V>,
    next_id: u64,
}

impl<V> HandleTable<V> {
    /// Create an empty table. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Store `value` under a fresh id.
    pub fn insert(&mut self, value: V) -> HandleId {
        let id = HandleId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, value);
        id
    }

    /// Borrow the object behind `id`.
    pub fn get(&self, id: HandleId) -> Option<&V> {
        self.entries.get(&id)
    }

    /// Take the object out of the table.
    pub fn remove(&mut self, id: HandleId) -> Result<V> {
        self.entries
            .remove(&id)
            .ok_or_else(|| BridgeError::AlreadyDisposed(format!("handle {}", id)))
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Get live entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, handing them back for teardown.
    pub fn drain(&mut self) -> Vec<(HandleId, V)> {
        self.entries.drain().collect()
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
