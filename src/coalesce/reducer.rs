//! Pure two-stage keyed reduction, driven by an external clock.

use std::collections::HashMap;
use std::hash::Hash;

/// Insertion-ordered map where a repeated key overwrites in place.
struct KeyedBuffer<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, usize>,
}

impl<K: Eq + Hash + Clone, V> KeyedBuffer<K, V> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn upsert(&mut self, key: K, value: V) {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    fn drain(&mut self) -> Vec<(K, V)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Latest value per key within one window. Never empty, keys unique, in
/// the order each key was first seen in the window.
#[derive(Clone, Debug, PartialEq)]
pub struct CoalescedBatch<K, V> {
    entries: Vec<(K, V)>,
    raw_events: u64,
}

impl<K: PartialEq, V> CoalescedBatch<K, V> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value for `key` in this batch.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Raw events pushed since the previous batch.
    pub fn raw_events(&self) -> u64 {
        self.raw_events
    }

    /// Values in first-seen key order.
    pub fn into_values(self) -> Vec<V> {
        self.entries.into_iter().map(|(_, v)| v).collect()
    }

    pub fn into_entries(self) -> Vec<(K, V)> {
        self.entries
    }
}

/// The coalescing state machine without timers.
///
/// - [`push`](Self::push) feeds a raw event
/// - [`flush_partitions`](Self::flush_partitions) closes a stage-one
///   buffer: the last value per key survives, optionally suppressed when
///   equal to what that key last produced
/// - [`flush_batch`](Self::flush_batch) closes a stage-two buffer
pub struct WindowReducer<K, V> {
    partitions: KeyedBuffer<K, V>,
    merged: KeyedBuffer<K, V>,
    last_emitted: HashMap<K, V>,
    distinct: bool,
    raw_events: u64,
    suppressed: u64,
}

impl<K, V> WindowReducer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    /// Create a reducer, optionally suppressing repeats per key.
    pub fn new(distinct_until_changed: bool) -> Self {
        Self {
            partitions: KeyedBuffer::new(),
            merged: KeyedBuffer::new(),
            last_emitted: HashMap::new(),
            distinct: distinct_until_changed,
            raw_events: 0,
            suppressed: 0,
        }
    }

    /// Feed one raw event into stage one.
    pub fn push(&mut self, key: K, value: V) {
        self.raw_events += 1;
        self.partitions.upsert(key, value);
    }

    /// Close the stage-one buffer into stage two.
    pub fn flush_partitions(&mut self) {
        for (key, value) in self.partitions.drain() {
            if self.distinct {
                if self.last_emitted.get(&key) == Some(&value) {
                    self.suppressed += 1;
                    continue;
                }
                self.last_emitted.insert(key.clone(), value.clone());
            }
            self.merged.upsert(key, value);
        }
    }

    /// Take the stage-two buffer, or `None` when nothing survived.
    pub fn flush_batch(&mut self) -> Option<CoalescedBatch<K, V>> {
        if self.merged.len() == 0 {
            return None;
        }
        let batch = CoalescedBatch {
            entries: self.merged.drain(),
            raw_events: self.raw_events,
        };
        self.raw_events = 0;
        Some(batch)
    }

    /// Drop everything buffered without producing a batch, along with the
    /// per-key memory of the distinct filter.
    pub fn discard(&mut self) {
        self.partitions.drain();
        self.merged.drain();
        self.last_emitted.clear();
        self.raw_events = 0;
    }

    /// Values buffered in either stage.
    pub fn pending_len(&self) -> usize {
        self.partitions.len() + self.merged.len()
    }

    /// Values dropped by the distinct-until-changed filter so far.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_value_per_key_wins() {
        let mut reducer = WindowReducer::new(false);
        reducer.push("n1", (0, 0));
        reducer.push("n2", (1, 1));
        reducer.push("n1", (10, 5));
        reducer.flush_partitions();

        let batch = reducer.flush_batch().unwrap();
        assert_eq!(batch.into_entries(), vec![("n1", (10, 5)), ("n2", (1, 1))]);
    }

    #[test]
    fn test_stage_two_merges_partition_flushes() {
        let mut reducer = WindowReducer::new(false);
        reducer.push("a", 1);
        reducer.flush_partitions();
        reducer.push("b", 2);
        reducer.push("a", 3);
        reducer.flush_partitions();

        let batch = reducer.flush_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(&"a"), Some(&3));
        assert_eq!(batch.raw_events(), 3);
    }

    #[test]
    fn test_empty_batch_never_produced() {
        let mut reducer = WindowReducer::<&str, i32>::new(true);
        reducer.flush_partitions();
        assert!(reducer.flush_batch().is_none());
    }

    #[test]
    fn test_distinct_until_changed() {
        let mut reducer = WindowReducer::new(true);
        reducer.push("n1", 1);
        reducer.flush_partitions();
        assert!(reducer.flush_batch().is_some());

        reducer.push("n1", 1);
        reducer.flush_partitions();
        assert!(reducer.flush_batch().is_none());
        assert_eq!(reducer.suppressed(), 1);

        reducer.push("n1", 2);
        reducer.flush_partitions();
        assert_eq!(reducer.flush_batch().unwrap().get(&"n1"), Some(&2));
    }

    #[test]
    fn test_discard_drops_buffers() {
        let mut reducer = WindowReducer::new(false);
        reducer.push("a", 1);
        reducer.flush_partitions();
        reducer.push("b", 2);
        assert_eq!(reducer.pending_len(), 2);

        reducer.discard();
        reducer.flush_partitions();
        assert!(reducer.flush_batch().is_none());
    }

    #[test]
    fn test_discard_forgets_distinct_history() {
        let mut reducer = WindowReducer::new(true);
        for key in 0..64u32 {
            reducer.push(key, 7);
        }
        reducer.flush_partitions();
        assert_eq!(reducer.flush_batch().unwrap().len(), 64);

        reducer.discard();
        reducer.push(3, 7);
        reducer.flush_partitions();
        assert_eq!(reducer.flush_batch().unwrap().into_entries(), vec![(3, 7)]);
        assert_eq!(reducer.suppressed(), 0);
    }
}
