//! Subscription types for boundary-crossing streams.

use crate::error::{BridgeError, Result};
use crate::types::{HandleId, SubscriptionId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::manager::ConsumerRegistry;

/// A call from the remote runtime into a host-side consumer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// An encoded value.
    Next { payload: Vec<u8> },
    /// The source failed; terminal.
    Error { message: String },
    /// The source finished; terminal.
    Completed,
}

/// Push-side sink of a subscription.
pub trait Observer<T>: Send + 'static {
    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: BridgeError);

    fn on_completed(&mut self) {}
}

/// An [`Observer`] assembled from closures.
pub struct Callbacks<T> {
    next: Box<dyn FnMut(T) + Send>,
    error: Box<dyn FnMut(BridgeError) + Send>,
    completed: Box<dyn FnMut() + Send>,
}

impl<T> Callbacks<T> {
    pub fn new(next: impl FnMut(T) + Send + 'static) -> Self {
        Self {
            next: Box::new(next),
            error: Box::new(|e| warn!(error = %e, "unhandled subscription error")),
            completed: Box::new(|| {}),
        }
    }

    pub fn with_error(mut self, error: impl FnMut(BridgeError) + Send + 'static) -> Self {
        self.error = Box::new(error);
        self
    }

    pub fn with_completed(mut self, completed: impl FnMut() + Send + 'static) -> Self {
        self.completed = Box::new(completed);
        self
    }
}

impl<T: 'static> Observer<T> for Callbacks<T> {
    fn on_next(&mut self, value: T) {
        (self.next)(value)
    }

    fn on_error(&mut self, error: BridgeError) {
        (self.error)(error)
    }

    fn on_completed(&mut self) {
        (self.completed)()
    }
}

/// Completion of a teardown.
///
/// Resolves once the remote forwarding resource has been released, or was
/// found to be released already. Dropping it does not cancel the teardown.
pub struct Teardown {
    outcome: Option<Receiver<Result<()>>>,
}

impl Teardown {
    pub(crate) fn completed() -> Self {
        Self { outcome: None }
    }

    pub(crate) fn pending(outcome: Option<Receiver<Result<()>>>) -> Self {
        Self { outcome }
    }

    /// Block until the teardown finished.
    pub fn wait(self) -> Result<()> {
        match self.outcome {
            None => Ok(()),
            Some(outcome) => outcome.recv().unwrap_or_else(|_| {
                debug!("teardown outcome dropped");
                Ok(())
            }),
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<()>> {
        match self.outcome {
            None => Some(Ok(())),
            Some(outcome) => match outcome.recv_timeout(timeout) {
                Ok(result) => Some(result),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Ok(())),
            },
        }
    }
}

/// Handle to a push subscription.
///
/// Owns exactly one remote forwarding resource. Disposal is idempotent and
/// also happens on drop.
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) source: HandleId,
    pub(crate) disposed: Arc<AtomicBool>,
    pub(crate) consumers: Arc<ConsumerRegistry>,
    pub(crate) stop: Sender<()>,
    pub(crate) outcome: Mutex<Option<Receiver<Result<()>>>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The remote object this subscription listens to.
    pub fn source(&self) -> HandleId {
        self.source
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop the local stream, then release the remote forwarder.
    ///
    /// A second call is a no-op whose teardown resolves immediately. The
    /// teardown is finished by the delivery thread, so a sink disposing its
    /// own subscription must not wait on it.
    pub fn dispose(&self) -> Teardown {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Teardown::completed();
        }

        debug!(consumer = %self.id, source = %self.source, "disposing subscription");
        self.consumers.unregister(self.id);
        let _ = self.stop.try_send(());
        Teardown::pending(self.outcome.lock().take())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

/// Cancels a pull subscription from any thread.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    signal: Sender<()>,
}

impl CancellationToken {
    pub(crate) fn new() -> (Self, Receiver<()>) {
        let (signal, receiver) = bounded(1);
        let token = Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal,
        };
        (token, receiver)
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.signal.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A remote collection found through its container key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionHandle {
    pub key: String,
    pub handle: HandleId,
}
