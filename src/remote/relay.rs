//! Forwarding of producer-side events into host-side consumers.

use super::objects::{ListenerGuard, RemoteObservable};
use super::subject::{EventSubject, Signal};
use crate::changes::Change;
use crate::collection::ObservableCollection;
use crate::config::Telemetry;
use crate::error::{BridgeError, Result};
use crate::subscriptions::{ConsumerRef, Notification};
use crate::types::WireCodec;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Encodes values and delivers them to one host-side consumer.
///
/// A consumer that has already gone away is not an error here: the host
/// releases the forwarder shortly after, so late deliveries are dropped.
///
/// Clones share one terminal state. After the first `OnError` or
/// `OnCompleted` every further notification is dropped.
#[derive(Clone, Debug)]
pub struct Relay {
    consumer: ConsumerRef,
    codec: WireCodec,
    telemetry: Telemetry,
    terminated: Arc<Mutex<bool>>,
}

impl Relay {
    /// Create a relay feeding `consumer`.
    pub fn new(consumer: ConsumerRef, codec: WireCodec, telemetry: Telemetry) -> Self {
        Self {
            consumer,
            codec,
            telemetry,
            terminated: Arc::new(Mutex::new(false)),
        }
    }

    /// Get the consumer this relay delivers to.
    pub fn consumer(&self) -> &ConsumerRef {
        &self.consumer
    }

    /// Whether a terminal notification went out.
    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }

    /// Encode and deliver a value. An unencodable value ends the stream.
    pub fn next<V: Serialize + ?Sized>(&self, value: &V) -> Result<()> {
        let payload = match self.codec.encode(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.error(e.to_string())?;
                return Err(e);
            }
        };

        // Held across delivery so a terminal signal cannot overtake this one.
        let terminated = self.terminated.lock();
        if *terminated {
            trace!(consumer = %self.consumer.id(), "dropping OnNext after terminal signal");
            return Ok(());
        }
        if self.telemetry.log_payloads {
            debug!(
                consumer = %self.consumer.id(),
                payload = %self.codec.describe(&payload),
                "relaying OnNext"
            );
        }
        self.deliver(Notification::Next { payload })
    }

    /// Deliver `OnError` unless the stream already ended.
    pub fn error(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let mut terminated = self.terminated.lock();
        if *terminated {
            trace!(consumer = %self.consumer.id(), error = %message, "dropping OnError after terminal signal");
            return Ok(());
        }
        *terminated = true;
        debug!(consumer = %self.consumer.id(), error = %message, "relaying OnError");
        self.deliver(Notification::Error { message })
    }

    /// Deliver `OnCompleted` unless the stream already ended.
    pub fn completed(&self) -> Result<()> {
        let mut terminated = self.terminated.lock();
        if *terminated {
            trace!(consumer = %self.consumer.id(), "dropping OnCompleted after terminal signal");
            return Ok(());
        }
        *terminated = true;
        debug!(consumer = %self.consumer.id(), "relaying OnCompleted");
        self.deliver(Notification::Completed)
    }

    fn deliver(&self, notification: Notification) -> Result<()> {
        match self.consumer.deliver(notification) {
            Err(BridgeError::AlreadyDisposed(what)) => {
                trace!(consumer = %self.consumer.id(), %what, "dropping delivery to disposed consumer");
                Ok(())
            }
            other => other,
        }
    }
}

/// Bootstrap variant: a listener first receives one `AddRange` with the
/// current contents (skipped when empty), then every later change.
impl<T> RemoteObservable for ObservableCollection<T>
where
    T: Serialize + Clone + PartialEq + Send + Sync + 'static,
{
    fn listen(&self, relay: Relay) -> Result<ListenerGuard> {
        let snapshot_relay = relay.clone();
        let mut snapshot_result = Ok(());

        let id = self.listen_with_snapshot(
            |items| {
                if let Some(snapshot) = Change::add_range(items.to_vec(), 0) {
                    snapshot_result = snapshot_relay.next(&snapshot);
                }
            },
            move |change: &Change<T>| relay.next(change),
        );

        let collection = self.clone();
        let guard = ListenerGuard::new(move || {
            collection.remove_listener(id);
        });
        snapshot_result.map(|()| guard)
    }
}

impl<T> RemoteObservable for EventSubject<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn listen(&self, relay: Relay) -> Result<ListenerGuard> {
        let id = self.subscribe(move |signal: &Signal<T>| {
            let outcome = match signal {
                Signal::Next(value) => relay.next(value),
                Signal::Error(message) => relay.error(message.clone()),
                Signal::Completed => relay.completed(),
            };
            if let Err(e) = outcome {
                debug!(error = %e, "subject relay failed");
            }
        });

        let subject = self.clone();
        Ok(ListenerGuard::new(move || {
            subject.unsubscribe(id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeReason;
    use crate::subscriptions::ConsumerRegistry;
    use crossbeam_channel::Receiver;
    use std::collections::HashMap;
    use std::time::Duration;

    fn relay() -> (Relay, Receiver<Notification>, Arc<ConsumerRegistry>) {
        let registry = Arc::new(ConsumerRegistry::new());
        let (consumer, rx) = registry.register();
        (
            Relay::new(consumer, WireCodec::Json, Telemetry::verbose()),
            rx,
            registry,
        )
    }

    fn next_change(rx: &Receiver<Notification>) -> Change<String> {
        match rx.recv_timeout(Duration::from_millis(100)).unwrap() {
            Notification::Next { payload } => WireCodec::Json.decode(&payload).unwrap(),
            other => panic!("expected OnNext, got {:?}", other),
        }
    }

    #[test]
    fn test_collection_bootstrap_snapshot_then_deltas() {
        let collection = ObservableCollection::new();
        collection.add_range(vec!["n1".to_string(), "n2".to_string()]);

        let (relay, rx, _registry) = relay();
        let _guard = collection.listen(relay).unwrap();
        collection.add("n3".to_string());

        let snapshot = next_change(&rx);
        assert_eq!(snapshot.reason(), ChangeReason::AddRange);
        assert_eq!(snapshot.as_range().unwrap().items, vec!["n1", "n2"]);

        let delta = next_change(&rx);
        assert_eq!(delta.reason(), ChangeReason::Add);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_collection_sends_no_snapshot() {
        let collection = ObservableCollection::<String>::new();
        let (relay, rx, _registry) = relay();
        let _guard = collection.listen(relay).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn test_guard_stops_forwarding() {
        let collection = ObservableCollection::new();
        let (relay, rx, _registry) = relay();
        let guard = collection.listen(relay).unwrap();
        guard.release();

        collection.add("late".to_string());
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert_eq!(collection.listener_count(), 0);
    }

    #[test]
    fn test_disposed_consumer_is_not_an_error() {
        let (relay, _rx, registry) = relay();
        registry.unregister(relay.consumer().id());
        assert!(relay.next(&1u32).is_ok());
        assert!(relay.completed().is_ok());
    }

    #[test]
    fn test_nothing_follows_a_terminal_signal() {
        let (relay, rx, _registry) = relay();
        let twin = relay.clone();

        relay.next(&1u32).unwrap();
        twin.error("drag source lost").unwrap();
        relay.next(&2u32).unwrap();
        relay.completed().unwrap();
        twin.error("again").unwrap();

        let timeout = Duration::from_millis(100);
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Next { .. }
        ));
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Error {
                message: "drag source lost".into()
            }
        );
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
        assert!(relay.is_terminated());
    }

    #[test]
    fn test_unencodable_value_ends_stream_once() {
        let (relay, rx, _registry) = relay();
        let unencodable: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        assert!(relay.next(&unencodable).is_err());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            Notification::Error { .. }
        ));

        assert!(relay.next(&unencodable).is_err());
        relay.next(&4u32).unwrap();
        relay.completed().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn test_subject_relays_terminal_signals() {
        let subject = EventSubject::new();
        let (relay, rx, _registry) = relay();
        let _guard = subject.listen(relay).unwrap();

        subject.next(5u32);
        subject.error("drag source lost");

        let timeout = Duration::from_millis(100);
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Next { .. }
        ));
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Notification::Error {
                message: "drag source lost".into()
            }
        );
    }
}
