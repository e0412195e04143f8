//! Registry of host-side consumers reachable from the remote runtime.

use crate::error::{BridgeError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::types::Notification;
use crate::types::SubscriptionId;

/// Internal consumer state.
struct Consumer {
    sender: Sender<Notification>,
}

/// Host-side table of consumers.
///
/// The remote runtime never holds a consumer's channel directly: it holds a
/// [`ConsumerRef`] and every call goes through this table, so unregistering
/// a consumer cuts the far side off immediately.
pub struct ConsumerRegistry {
    /// Active consumers by ID.
    consumers: RwLock<HashMap<SubscriptionId, Consumer>>,
    /// Counter for generating consumer IDs.
    next_id: AtomicU64,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a consumer. The channel is unbounded: the bridge does not
    /// apply backpressure to producers.
    pub fn register(self: &Arc<Self>) -> (ConsumerRef, Receiver<Notification>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();

        self.consumers.write().insert(id, Consumer { sender });
        debug!(consumer = %id, "registered consumer");

        let consumer = ConsumerRef {
            id,
            registry: Arc::clone(self),
        };
        (consumer, receiver)
    }

    /// Unregister and close the consumer's channel. Idempotent.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.consumers.write().remove(&id).is_some();
        if removed {
            debug!(consumer = %id, "unregistered consumer");
        }
        removed
    }

    /// Deliver a notification. Fails with `AlreadyDisposed` once the consumer
    /// is gone; a consumer whose receiver was dropped is removed here.
    pub fn deliver(&self, id: SubscriptionId, notification: Notification) -> Result<()> {
        let delivered = {
            let consumers = self.consumers.read();
            match consumers.get(&id) {
                Some(consumer) => consumer.sender.send(notification).is_ok(),
                None => return Err(disposed(id)),
            }
        };

        if !delivered {
            trace!(consumer = %id, "consumer receiver dropped");
            self.unregister(id);
            return Err(disposed(id));
        }
        Ok(())
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn is_registered(&self, id: SubscriptionId) -> bool {
        self.consumers.read().contains_key(&id)
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn disposed(id: SubscriptionId) -> BridgeError {
    BridgeError::AlreadyDisposed(format!("consumer {}", id))
}

/// The remote runtime's reference to a host-side consumer.
#[derive(Clone)]
pub struct ConsumerRef {
    id: SubscriptionId,
    registry: Arc<ConsumerRegistry>,
}

impl ConsumerRef {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn on_next(&self, payload: Vec<u8>) -> Result<()> {
        self.registry.deliver(self.id, Notification::Next { payload })
    }

    pub fn on_error(&self, message: impl Into<String>) -> Result<()> {
        self.registry.deliver(
            self.id,
            Notification::Error {
                message: message.into(),
            },
        )
    }

    pub fn on_completed(&self) -> Result<()> {
        self.registry.deliver(self.id, Notification::Completed)
    }

    pub(crate) fn deliver(&self, notification: Notification) -> Result<()> {
        self.registry.deliver(self.id, notification)
    }
}

impl std::fmt::Debug for ConsumerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRef").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_unregister() {
        let registry = Arc::new(ConsumerRegistry::new());

        let (consumer, _rx) = registry.register();
        assert_eq!(registry.consumer_count(), 1);

        assert!(registry.unregister(consumer.id()));
        assert!(!registry.unregister(consumer.id()));
        assert_eq!(registry.consumer_count(), 0);
    }

    #[test]
    fn test_delivery_in_order() {
        let registry = Arc::new(ConsumerRegistry::new());
        let (consumer, rx) = registry.register();

        consumer.on_next(b"1".to_vec()).unwrap();
        consumer.on_next(b"2".to_vec()).unwrap();
        consumer.on_completed().unwrap();

        let timeout = Duration::from_millis(100);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Next { payload: b"1".to_vec() }
        );
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Next { payload: b"2".to_vec() }
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), Notification::Completed);
    }

    #[test]
    fn test_delivery_after_unregister_is_already_disposed() {
        let registry = Arc::new(ConsumerRegistry::new());
        let (consumer, rx) = registry.register();
        registry.unregister(consumer.id());

        let result = consumer.on_next(b"late".to_vec());
        assert!(matches!(result, Err(BridgeError::AlreadyDisposed(_))));
        // The channel closed with the registration.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_dropped_receiver_removes_consumer() {
        let registry = Arc::new(ConsumerRegistry::new());
        let (consumer, rx) = registry.register();
        drop(rx);

        assert!(consumer.on_error("gone").is_err());
        assert_eq!(registry.consumer_count(), 0);
    }
}
