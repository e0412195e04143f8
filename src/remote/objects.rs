//! Objects the remote runtime can publish.

use super::relay::Relay;
use crate::error::Result;
use std::sync::Arc;

/// A push source that can forward its events across the boundary.
pub trait RemoteObservable: Send + Sync {
    /// Start forwarding into `relay`. The returned guard stops forwarding
    /// when released or dropped.
    fn listen(&self, relay: Relay) -> Result<ListenerGuard>;
}

/// A target for remote method calls.
pub trait RemoteService: Send + Sync {
    fn invoke(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// The forwarding resource created by a listen call.
pub struct ListenerGuard {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerGuard {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn release(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.run_detach();
    }
}

/// An entry in the remote handle table.
pub enum RemoteObject {
    Observable(Arc<dyn RemoteObservable>),
    Listener(ListenerGuard),
    Service(Arc<dyn RemoteService>),
}

impl RemoteObject {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteObject::Observable(_) => "an observable",
            RemoteObject::Listener(_) => "a listener",
            RemoteObject::Service(_) => "a service",
        }
    }
}
