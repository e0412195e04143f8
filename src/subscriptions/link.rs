//! One consumer wired to one remote forwarder.
//!
//! Shared by push subscriptions and pull streams: both read notifications
//! and tear down the same way.

use super::manager::ConsumerRegistry;
use super::types::Notification;
use crate::error::{BridgeError, Result};
use crate::remote::{PendingCall, RemoteRuntime};
use crate::types::{HandleId, SubscriptionId, WireCodec};
use crossbeam_channel::{never, select, Receiver, RecvError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, trace};

/// What a link produced next.
pub(crate) enum Step<T> {
    Next(T),
    /// Terminal: forwarding could not start, the source failed, or a
    /// payload did not decode.
    Failed(BridgeError),
    Completed,
    /// The local side stopped reading.
    Stopped,
}

enum Wake {
    Stop,
    Attached(std::result::Result<Result<HandleId>, RecvError>),
    Notified(std::result::Result<Notification, RecvError>),
}

pub(crate) struct Link {
    consumer: SubscriptionId,
    source: HandleId,
    consumers: Arc<ConsumerRegistry>,
    notifications: Receiver<Notification>,
    /// Reply to the listen call, until it arrives.
    attach: Option<PendingCall<HandleId>>,
    forwarder: Option<HandleId>,
    runtime: RemoteRuntime,
    codec: WireCodec,
    released: bool,
}

impl Link {
    /// Register a consumer, then ask the far side to forward into it.
    pub(crate) fn open(
        runtime: &RemoteRuntime,
        consumers: &Arc<ConsumerRegistry>,
        source: HandleId,
    ) -> Self {
        let (consumer, notifications) = consumers.register();
        let id = consumer.id();
        let attach = runtime.execute(move |scope| scope.listen(source, consumer));
        debug!(consumer = %id, %source, "subscription opened");

        Self {
            consumer: id,
            source,
            consumers: Arc::clone(consumers),
            notifications,
            attach: Some(attach),
            forwarder: None,
            runtime: runtime.clone(),
            codec: runtime.codec(),
            released: false,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.consumer
    }

    /// Block until the next notification, a stop request, or a failure.
    pub(crate) fn next_step<T: DeserializeOwned>(&mut self, stop: &Receiver<()>) -> Step<T> {
        loop {
            let wake = {
                let pending = never();
                let attach = self.attach.as_ref().map_or(&pending, |call| call.receiver());
                select! {
                    recv(stop) -> _ => Wake::Stop,
                    recv(attach) -> reply => Wake::Attached(reply),
                    recv(self.notifications) -> notification => Wake::Notified(notification),
                }
            };

            match wake {
                Wake::Stop => return Step::Stopped,
                Wake::Attached(reply) => {
                    self.attach = None;
                    match reply {
                        Ok(Ok(forwarder)) => {
                            trace!(consumer = %self.consumer, %forwarder, "forwarder attached");
                            self.forwarder = Some(forwarder);
                        }
                        Ok(Err(e)) => return Step::Failed(e),
                        Err(_) => {
                            return Step::Failed(BridgeError::boundary(format!(
                                "listen on {} was abandoned",
                                self.source
                            )))
                        }
                    }
                }
                Wake::Notified(Ok(Notification::Next { payload })) => {
                    return match self.codec.decode(&payload) {
                        Ok(value) => Step::Next(value),
                        Err(e) => Step::Failed(e),
                    };
                }
                Wake::Notified(Ok(Notification::Error { message })) => {
                    return Step::Failed(BridgeError::BoundaryInvocation(message))
                }
                Wake::Notified(Ok(Notification::Completed)) => return Step::Completed,
                // The consumer was unregistered.
                Wake::Notified(Err(_)) => return Step::Stopped,
            }
        }
    }

    /// Unregister the consumer, then release the far-side forwarder.
    ///
    /// Idempotent. A forwarder the far side already dropped, or a runtime
    /// that already stopped, counts as released.
    pub(crate) fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.consumers.unregister(self.consumer);

        // Jobs run in order, so a pending listen reply precedes our release.
        let forwarder = match (self.forwarder.take(), self.attach.take()) {
            (Some(forwarder), _) => Some(forwarder),
            (None, Some(attach)) => attach.wait().ok(),
            (None, None) => None,
        };
        let Some(forwarder) = forwarder else {
            return Ok(());
        };

        match self.runtime.release(forwarder).wait() {
            Ok(()) => {
                debug!(consumer = %self.consumer, %forwarder, "forwarder released");
                Ok(())
            }
            Err(e) if e.is_already_disposed() || !self.runtime.is_running() => {
                debug!(consumer = %self.consumer, %forwarder, error = %e, "forwarder already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!(consumer = %self.consumer, error = %e, "release on drop failed");
        }
    }
}
