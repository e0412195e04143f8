//! Host-side entry points for crossing the boundary.

use super::link::{Link, Step};
use super::manager::ConsumerRegistry;
use super::stream::EventStream;
use super::types::{CollectionHandle, Observer, SubscriptionHandle};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::remote::{PendingCall, RemoteRuntime};
use crate::types::HandleId;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Subscribes host-side sinks to objects published on a [`RemoteRuntime`].
///
/// Clones share one consumer registry.
#[derive(Clone)]
pub struct BoundaryClient {
    runtime: RemoteRuntime,
    consumers: Arc<ConsumerRegistry>,
    config: BridgeConfig,
}

impl BoundaryClient {
    pub fn new(runtime: &RemoteRuntime) -> Self {
        Self {
            runtime: runtime.clone(),
            consumers: Arc::new(ConsumerRegistry::new()),
            config: runtime.config().clone(),
        }
    }

    pub fn runtime(&self) -> &RemoteRuntime {
        &self.runtime
    }

    /// Push `source`'s events into `sink` on a dedicated delivery thread.
    ///
    /// Events reach the sink in emission order. A failure to start
    /// forwarding, a source error or an undecodable payload ends the stream
    /// through `on_error`. Dropping the handle disposes the subscription.
    pub fn subscribe<T, O>(&self, source: HandleId, sink: O) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        O: Observer<T>,
    {
        let mut link = Link::open(&self.runtime, &self.consumers, source);
        let id = link.id();
        let disposed = Arc::new(AtomicBool::new(false));
        let (stop, stop_rx) = bounded(1);
        let (outcome_tx, outcome_rx) = bounded(1);

        let flag = Arc::clone(&disposed);
        thread::Builder::new()
            .name(format!("crossbridge-sub-{}", id))
            .spawn(move || {
                let mut sink = sink;
                pump(&mut link, &stop_rx, &flag, &mut sink);
                let _ = outcome_tx.send(link.release());
            })?;

        Ok(SubscriptionHandle {
            id,
            source,
            disposed,
            consumers: Arc::clone(&self.consumers),
            stop,
            outcome: Mutex::new(Some(outcome_rx)),
        })
    }

    /// Consume `source` as a blocking iterator.
    pub fn listen<T: DeserializeOwned>(&self, source: HandleId) -> EventStream<T> {
        EventStream::new(Link::open(&self.runtime, &self.consumers, source))
    }

    /// Find the collection registered under `key`, polling while it has not
    /// been published yet.
    ///
    /// Blocks the caller for at most the configured attach timeout, then
    /// fails with [`BridgeError::RetrievalTimeout`].
    pub fn attach_to_collection(&self, key: &str) -> Result<CollectionHandle> {
        let policy = &self.config.attach;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(handle) = self.runtime.lookup_container(key).wait()? {
                info!(key, %handle, attempts, "attached to collection");
                return Ok(CollectionHandle {
                    key: key.to_string(),
                    handle,
                });
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                warn!(key, ?waited, attempts, "collection never appeared");
                return Err(BridgeError::RetrievalTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            thread::sleep(policy.poll_interval.min(policy.timeout - waited));
        }
    }

    /// Call `method` on a published service.
    pub fn invoke(
        &self,
        target: HandleId,
        method: impl Into<String>,
        args: serde_json::Value,
    ) -> PendingCall<serde_json::Value> {
        let method = method.into();
        self.runtime
            .execute(move |scope| scope.invoke(target, &method, args))
    }

    /// Consumers currently reachable from the far side.
    pub fn consumer_count(&self) -> usize {
        self.consumers.consumer_count()
    }
}

fn pump<T, O>(link: &mut Link, stop: &Receiver<()>, disposed: &AtomicBool, sink: &mut O)
where
    T: DeserializeOwned,
    O: Observer<T>,
{
    let id = link.id();
    loop {
        let step = link.next_step::<T>(stop);
        // Nothing reaches the sink once disposal started.
        if disposed.load(Ordering::SeqCst) {
            debug!(consumer = %id, "delivery stopped by disposal");
            return;
        }

        let (outcome, terminal) = match step {
            Step::Next(value) => (
                panic::catch_unwind(AssertUnwindSafe(|| sink.on_next(value))),
                false,
            ),
            Step::Failed(e) => {
                debug!(consumer = %id, error = %e, "subscription failed");
                (
                    panic::catch_unwind(AssertUnwindSafe(|| sink.on_error(e))),
                    true,
                )
            }
            Step::Completed => (
                panic::catch_unwind(AssertUnwindSafe(|| sink.on_completed())),
                true,
            ),
            Step::Stopped => return,
        };

        if outcome.is_err() {
            warn!(consumer = %id, "subscription sink panicked");
        }
        if terminal {
            return;
        }
    }
}
