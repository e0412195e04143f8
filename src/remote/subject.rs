//! Multicast push source living in the remote runtime.

use crate::types::ListenerId;
use parking_lot::Mutex;
use std::sync::Arc;

/// What a subject pushes to its observers.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal<T> {
    Next(T),
    Error(String),
    Completed,
}

type SubjectObserver<T> = Arc<dyn Fn(&Signal<T>) + Send + Sync>;

enum Terminal {
    Error(String),
    Completed,
}

struct SubjectInner<T> {
    observers: Vec<(ListenerId, SubjectObserver<T>)>,
    terminal: Option<Terminal>,
    next_id: u64,
}

/// A raw event stream: every `next` reaches the observers registered at
/// that moment, in registration order.
///
/// After `error` or `complete` the subject stays terminated; late observers
/// receive the terminal signal immediately.
pub struct EventSubject<T> {
    inner: Arc<Mutex<SubjectInner<T>>>,
}

impl<T> Clone for EventSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventSubject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubjectInner {
                observers: Vec::new(),
                terminal: None,
                next_id: 1,
            })),
        }
    }

    /// Register `observer`. A terminated subject replays its terminal signal instead.
    pub fn subscribe<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&Signal<T>) + Send + Sync + 'static,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;

        match &inner.terminal {
            Some(Terminal::Error(message)) => observer(&Signal::Error(message.clone())),
            Some(Terminal::Completed) => observer(&Signal::Completed),
            None => inner.observers.push((id, Arc::new(observer))),
        }
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(observer_id, _)| *observer_id != id);
        inner.observers.len() != before
    }

    /// Push a value. Ignored once terminated.
    pub fn next(&self, value: T) {
        let inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        let signal = Signal::Next(value);
        for (_, observer) in &inner.observers {
            observer(&signal);
        }
    }

    /// Fail the stream. Later values are ignored.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.terminate(Signal::Error(message.clone()), Terminal::Error(message));
    }

    /// End the stream. Later values are ignored.
    pub fn complete(&self) {
        self.terminate(Signal::Completed, Terminal::Completed);
    }

    /// Get registered observer count.
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminal.is_some()
    }

    fn terminate(&self, signal: Signal<T>, terminal: Terminal) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        inner.terminal = Some(terminal);
        for (_, observer) in inner.observers.drain(..) {
            observer(&signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>(
        subject: &EventSubject<T>,
    ) -> (ListenerId, Arc<Mutex<Vec<Signal<T>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = subject.subscribe(move |signal: &Signal<T>| sink.lock().push(signal.clone()));
        (id, seen)
    }

    #[test]
    fn test_multicast_in_order() {
        let subject = EventSubject::new();
        let (_, first) = recorder(&subject);
        let (_, second) = recorder(&subject);

        subject.next(1);
        subject.next(2);

        let expected = vec![Signal::Next(1), Signal::Next(2)];
        assert_eq!(*first.lock(), expected);
        assert_eq!(*second.lock(), expected);
    }

    #[test]
    fn test_terminal_reaches_late_observers() {
        let subject = EventSubject::<u8>::new();
        subject.error("source failed");
        subject.next(1);

        let (_, late) = recorder(&subject);
        assert_eq!(*late.lock(), vec![Signal::Error("source failed".into())]);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subject = EventSubject::new();
        let (id, seen) = recorder(&subject);
        subject.next("a");
        assert!(subject.unsubscribe(id));
        subject.next("b");
        subject.complete();
        assert_eq!(*seen.lock(), vec![Signal::Next("a")]);
    }
}
