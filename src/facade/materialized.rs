//! Consumer-side keyed replica of a remote collection.

use crate::changes::{Change, ChangePayload, ChangeReason};
use crate::error::{BridgeError, Result};
use crate::subscriptions::{BoundaryClient, CollectionHandle, Observer, SubscriptionHandle, Teardown};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace, warn};

struct State<S, K, T> {
    items: HashMap<K, T>,
    /// Key each source item was stored under, so removals need no transform.
    sources: HashMap<S, K>,
    /// Number of sources stored under each key.
    owners: HashMap<K, usize>,
    count_observers: Vec<Sender<usize>>,
}

impl<S, K, T> State<S, K, T>
where
    S: Eq + Hash,
    K: Clone + Eq + Hash,
{
    fn store(&mut self, source: S, key: K, item: T) {
        if let Some(previous) = self.sources.insert(source, key.clone()) {
            self.release(previous);
        }
        *self.owners.entry(key.clone()).or_insert(0) += 1;
        self.items.insert(key, item);
    }

    fn forget(&mut self, source: &S) {
        if let Some(key) = self.sources.remove(source) {
            self.release(key);
        }
    }

    /// The entry goes away with the last source stored under its key.
    fn release(&mut self, key: K) {
        let Some(count) = self.owners.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.owners.remove(&key);
            self.items.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.items.clear();
        self.sources.clear();
        self.owners.clear();
    }
}

struct Shared<S, K, T> {
    state: Mutex<State<S, K, T>>,
    key_of: Box<dyn Fn(&T) -> K + Send + Sync>,
    transform: Box<dyn Fn(&S) -> Result<T> + Send + Sync>,
}

/// A local, keyed view rebuilt from a stream of [`Change`]s.
///
/// Incoming source items of type `S` are transformed into `T` and stored
/// under `key_of(&T)`. A failing transform omits that item only; the rest of
/// the change still applies. Enumeration order is unspecified.
///
/// Several source items may resolve to one key. The entry then holds the
/// latest stored item and stays until the last of those sources is removed.
pub struct MaterializedCollection<S, K, T> {
    shared: Arc<Shared<S, K, T>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<K, T> MaterializedCollection<T, K, T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Store items as they arrive, keyed by `key_of`.
    pub fn keyed(key_of: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::with_transform(|item: &T| Ok(item.clone()), key_of)
    }
}

impl<S, K, T> MaterializedCollection<S, K, T>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Resolve each incoming item through `transform` before keying it.
    pub fn with_transform(
        transform: impl Fn(&S) -> Result<T> + Send + Sync + 'static,
        key_of: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: HashMap::new(),
                    sources: HashMap::new(),
                    owners: HashMap::new(),
                    count_observers: Vec::new(),
                }),
                key_of: Box::new(key_of),
                transform: Box::new(transform),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to a remote collection and keep replaying its changes.
    pub fn connect(self, client: &BoundaryClient, collection: &CollectionHandle) -> Result<Self>
    where
        S: DeserializeOwned,
    {
        let sink = ReplaySink {
            shared: Arc::clone(&self.shared),
            key: collection.key.clone(),
        };
        let handle = client.subscribe::<Change<S>, _>(collection.handle, sink)?;
        debug!(key = %collection.key, subscription = %handle.id(), "materializing collection");
        *self.subscription.lock() = Some(handle);
        Ok(self)
    }

    /// Replay one change. Returns the transform failures, which have
    /// already been logged and left out of the view.
    pub fn apply(&self, change: Change<S>) -> Vec<BridgeError> {
        self.shared.apply(change)
    }

    /// Point lookup by key.
    pub fn lookup(&self, key: &K) -> Option<T> {
        self.shared.state.lock().items.get(key).cloned()
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.state.lock().items.contains_key(key)
    }

    /// Snapshot of all stored items.
    pub fn items(&self) -> Vec<T> {
        self.shared.state.lock().items.values().cloned().collect()
    }

    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<K> {
        self.shared.state.lock().items.keys().cloned().collect()
    }

    /// Snapshot of all key/item pairs.
    pub fn key_values(&self) -> Vec<(K, T)> {
        let state = self.shared.state.lock();
        state
            .items
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Get the number of stored entries.
    pub fn count(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Current count first, then every new count.
    pub fn count_changed(&self) -> Receiver<usize> {
        let (sender, receiver) = unbounded();
        let mut state = self.shared.state.lock();
        let _ = sender.send(state.items.len());
        state.count_observers.push(sender);
        receiver
    }

    /// Dispose the underlying subscription. The view keeps its last state.
    pub fn dispose(&self) -> Teardown {
        match self.subscription.lock().take() {
            Some(handle) => handle.dispose(),
            None => Teardown::completed(),
        }
    }
}

impl<S, K, T> Shared<S, K, T>
where
    S: Clone + Eq + Hash + Debug,
    K: Clone + Eq + Hash,
    T: Clone,
{
    fn apply(&self, change: Change<S>) -> Vec<BridgeError> {
        let reason = change.reason();
        let (upserts, removals, replaced) = match change.into_payload() {
            ChangePayload::Item(item) => match reason {
                ChangeReason::Add | ChangeReason::Refresh => (vec![item.current], vec![], None),
                ChangeReason::Replace => (vec![item.current], vec![], item.previous),
                ChangeReason::Remove => (vec![], vec![item.current], None),
                _ => (vec![], vec![], None),
            },
            ChangePayload::Range(range) => match reason {
                ChangeReason::AddRange => (range.items, vec![], None),
                ChangeReason::RemoveRange => (vec![], range.items, None),
                _ => (vec![], vec![], None),
            },
        };

        // Transforms may cross the boundary again; never under the lock.
        let mut failures = Vec::new();
        let mut resolved = Vec::with_capacity(upserts.len());
        for source in upserts {
            match (self.transform)(&source) {
                Ok(item) => {
                    let key = (self.key_of)(&item);
                    resolved.push((source, key, item));
                }
                Err(e) => {
                    let failure = BridgeError::Transform {
                        item: format!("{:?}", source),
                        reason: e.to_string(),
                    };
                    warn!(error = %failure, "omitting item from materialized view");
                    failures.push(failure);
                }
            }
        }

        let mut state = self.state.lock();
        let before = state.items.len();

        if reason == ChangeReason::Clear {
            state.clear();
        }
        for source in removals.iter().chain(replaced.as_ref()) {
            state.forget(source);
        }
        for (source, key, item) in resolved {
            state.store(source, key, item);
        }

        let after = state.items.len();
        trace!(%reason, before, after, "applied change");
        if after != before {
            state
                .count_observers
                .retain(|observer| observer.send(after).is_ok());
        }
        failures
    }
}

struct ReplaySink<S, K, T> {
    shared: Arc<Shared<S, K, T>>,
    key: String,
}

impl<S, K, T> Observer<Change<S>> for ReplaySink<S, K, T>
where
    S: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn on_next(&mut self, change: Change<S>) {
        self.shared.apply(change);
    }

    fn on_error(&mut self, error: BridgeError) {
        warn!(key = %self.key, error = %error, "materialized collection lost its source");
    }

    fn on_completed(&mut self) {
        debug!(key = %self.key, "materialized collection source completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(view: &MaterializedCollection<String, String, String>) -> Vec<String> {
        let mut keys = view.keys();
        keys.sort();
        keys
    }

    fn s(value: &str) -> String {
        value.to_string()
    }

    #[test]
    fn test_replay_add_range_remove() {
        let view = MaterializedCollection::keyed(|id: &String| id.clone());
        view.apply(Change::add(s("n1"), 0));
        view.apply(Change::add_range(vec![s("n2"), s("n3")], 1).unwrap());
        view.apply(Change::remove(s("n2"), 1));

        assert_eq!(ids(&view), vec![s("n1"), s("n3")]);
        assert_eq!(view.lookup(&s("n3")), Some(s("n3")));
    }

    #[test]
    fn test_replace_and_clear() {
        let view = MaterializedCollection::keyed(|id: &String| id.clone());
        view.apply(Change::add_range(vec![s("a"), s("b")], 0).unwrap());
        view.apply(Change::replace(s("c"), s("a"), 0));
        assert_eq!(ids(&view), vec![s("b"), s("c")]);

        view.apply(Change::clear());
        assert_eq!(view.count(), 0);
    }

    #[test]
    fn test_transform_failure_is_isolated() {
        let view = MaterializedCollection::with_transform(
            |id: &String| {
                if id == "x" {
                    Err(BridgeError::boundary("no such node"))
                } else {
                    Ok((id.clone(), id.len()))
                }
            },
            |(id, _): &(String, usize)| id.clone(),
        );

        let failures = view.apply(Change::add_range(vec![s("x"), s("y"), s("zz")], 0).unwrap());
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], BridgeError::Transform { .. }));
        assert_eq!(view.count(), 2);
        assert_eq!(view.lookup(&s("zz")), Some((s("zz"), 2)));
        assert!(!view.contains_key(&s("x")));
    }

    #[test]
    fn test_shared_key_survives_until_last_source_removed() {
        let view = MaterializedCollection::with_transform(
            |id: &String| Ok(id.trim_end_matches(char::is_numeric).to_string()),
            |group: &String| group.clone(),
        );
        view.apply(Change::add_range(vec![s("a1"), s("a2"), s("b1")], 0).unwrap());
        assert_eq!(ids(&view), vec![s("a"), s("b")]);

        view.apply(Change::remove(s("a1"), 0));
        assert_eq!(ids(&view), vec![s("a"), s("b")]);

        view.apply(Change::remove(s("a2"), 0));
        assert_eq!(ids(&view), vec![s("b")]);
    }

    #[test]
    fn test_count_changed_reports_current_then_changes() {
        let view = MaterializedCollection::keyed(|id: &String| id.clone());
        view.apply(Change::add(s("n1"), 0));

        let counts = view.count_changed();
        view.apply(Change::add(s("n2"), 1));
        view.apply(Change::refresh(s("n1"), 0));
        view.apply(Change::remove(s("n1"), 0));

        let seen: Vec<usize> = counts.try_iter().collect();
        assert_eq!(seen, vec![1, 2, 1]);
    }

    #[test]
    fn test_dispose_without_subscription() {
        let view = MaterializedCollection::keyed(|id: &String| id.clone());
        assert!(view.dispose().wait().is_ok());
    }
}
