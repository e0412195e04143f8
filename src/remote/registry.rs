//! Container registry: discoverable objects by key.

use crate::error::{BridgeError, Result};
use crate::types::HandleId;
use std::collections::HashMap;
use tracing::{info, warn};

/// Maps container keys to published handles.
///
/// Owned by one runtime instance; there is no process-wide registry.
#[derive(Default)]
pub struct ContainerRegistry {
    by_key: HashMap<String, HandleId>,
}

impl ContainerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `handle`. Fails if the key is already bound.
    pub fn register(&mut self, key: &str, handle: HandleId) -> Result<()> {
        if let Some(existing) = self.by_key.get(key) {
            warn!(key, %existing, %handle, "container key already registered");
            return Err(BridgeError::ContainerExists(key.to_string()));
        }
        info!(key, %handle, containers = self.by_key.len(), "registering container");
        self.by_key.insert(key.to_string(), handle);
        Ok(())
    }

    /// Handle bound to `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<HandleId> {
        self.by_key.get(key).copied()
    }

    /// Unbind `key`, returning the handle it held.
    pub fn unregister(&mut self, key: &str) -> Option<HandleId> {
        let removed = self.by_key.remove(key);
        if removed.is_some() {
            info!(key, containers = self.by_key.len(), "unregistered container");
        }
        removed
    }

    /// Drop every key pointing at a released handle.
    pub fn forget_handle(&mut self, handle: HandleId) {
        self.by_key.retain(|_, held| *held != handle);
    }

    /// Get registered key count.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
