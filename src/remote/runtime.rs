//! The remote runtime: a dedicated thread owning every published object.
//!
//! Callers never touch remote objects directly. They enqueue jobs that run
//! on the runtime thread in FIFO order and get a [`PendingCall`] back, so
//! nothing blocks unless the caller chooses to wait.

use super::handles::HandleTable;
use super::objects::{RemoteObject, RemoteObservable, RemoteService};
use super::registry::ContainerRegistry;
use super::relay::Relay;
use crate::config::{BridgeConfig, Telemetry};
use crate::error::{BridgeError, Result};
use crate::subscriptions::ConsumerRef;
use crate::types::{HandleId, WireCodec};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce(&mut RemoteScope) + Send>;

const STOPPED: &str = "remote runtime stopped";

/// Reply to a call queued on the remote runtime.
#[must_use = "a pending call does nothing unless waited on"]
pub struct PendingCall<R> {
    reply: Receiver<Result<R>>,
}

impl<R> PendingCall<R> {
    pub(crate) fn channel() -> (Sender<Result<R>>, Self) {
        let (sender, reply) = bounded(1);
        (sender, Self { reply })
    }

    pub(crate) fn failed(error: BridgeError) -> Self {
        let (sender, call) = Self::channel();
        let _ = sender.send(Err(error));
        call
    }

    /// Block until the call completed.
    pub fn wait(self) -> Result<R> {
        self.reply
            .recv()
            .unwrap_or_else(|_| Err(BridgeError::boundary("call abandoned")))
    }

    /// Wait at most `timeout`. `None` means the call is still queued.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<R>> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Some(Err(BridgeError::boundary("call abandoned")))
            }
        }
    }

    /// Poll without blocking. Yields the result at most once.
    pub fn try_wait(&self) -> Option<Result<R>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::boundary("call abandoned"))),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<Result<R>> {
        &self.reply
    }
}

/// State owned by the runtime thread. Jobs receive it by `&mut`.
pub struct RemoteScope {
    objects: HandleTable<RemoteObject>,
    containers: ContainerRegistry,
    /// Consumer behind each live listener handle, told about shutdown.
    forwarders: HashMap<HandleId, ConsumerRef>,
    codec: WireCodec,
    telemetry: Telemetry,
}

impl RemoteScope {
    fn new(config: &BridgeConfig) -> Self {
        Self {
            objects: HandleTable::new(),
            containers: ContainerRegistry::new(),
            forwarders: HashMap::new(),
            codec: config.codec,
            telemetry: config.telemetry.clone(),
        }
    }

    pub fn publish(&mut self, object: RemoteObject) -> HandleId {
        let kind = object.kind();
        let handle = self.objects.insert(object);
        debug!(%handle, kind, objects = self.objects.len(), "published remote object");
        handle
    }

    /// Remove an object. Releasing a listener stops its forwarding.
    pub fn release(&mut self, handle: HandleId) -> Result<()> {
        let object = self.objects.remove(handle)?;
        self.containers.forget_handle(handle);
        self.forwarders.remove(&handle);
        debug!(%handle, kind = object.kind(), "released remote object");
        drop(object);
        Ok(())
    }

    /// Start forwarding `source` into `consumer`; returns the listener handle.
    pub fn listen(&mut self, source: HandleId, consumer: ConsumerRef) -> Result<HandleId> {
        let observable = match self.objects.get(source) {
            Some(RemoteObject::Observable(observable)) => Arc::clone(observable),
            Some(_) => {
                return Err(BridgeError::HandleKindMismatch {
                    handle: source,
                    expected: "an observable",
                })
            }
            None => return Err(BridgeError::HandleNotFound(source)),
        };

        let relay = Relay::new(consumer.clone(), self.codec, self.telemetry.clone());
        let guard = observable.listen(relay)?;
        let handle = self.objects.insert(RemoteObject::Listener(guard));
        self.forwarders.insert(handle, consumer);
        debug!(%source, listener = %handle, "forwarding started");
        Ok(handle)
    }

    pub fn invoke(
        &self,
        target: HandleId,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match self.objects.get(target) {
            Some(RemoteObject::Service(service)) => service.invoke(method, args),
            Some(_) => Err(BridgeError::HandleKindMismatch {
                handle: target,
                expected: "a service",
            }),
            None => Err(BridgeError::HandleNotFound(target)),
        }
    }

    pub fn register_container(&mut self, key: &str, handle: HandleId) -> Result<()> {
        if !self.objects.contains(handle) {
            return Err(BridgeError::HandleNotFound(handle));
        }
        self.containers.register(key, handle)
    }

    pub fn unregister_container(&mut self, key: &str) -> Option<HandleId> {
        self.containers.unregister(key)
    }

    pub fn lookup_container(&self, key: &str) -> Option<HandleId> {
        self.containers.lookup(key)
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.objects.contains(handle)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn close(&mut self) {
        let released = self.objects.drain();
        let count = released.len();
        drop(released);

        for (_, consumer) in self.forwarders.drain() {
            if let Err(e) = consumer.on_error(STOPPED) {
                debug!(consumer = %consumer.id(), error = %e, "consumer gone at shutdown");
            }
        }
        info!(released = count, "remote runtime closed");
    }
}

struct RuntimeShared {
    jobs: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: BridgeConfig,
}

impl RuntimeShared {
    fn shutdown(&self) {
        // Dropping the sender lets the worker drain what is queued and exit.
        if self.jobs.lock().take().is_none() {
            return;
        }
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            debug!("shutdown requested from the runtime thread; not joining");
            return;
        }
        if worker.join().is_err() {
            warn!("remote runtime thread panicked");
        }
    }
}

impl Drop for RuntimeShared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the remote runtime. Clones share the same thread.
#[derive(Clone)]
pub struct RemoteRuntime {
    shared: Arc<RuntimeShared>,
}

impl RemoteRuntime {
    pub fn start(config: BridgeConfig) -> Result<Self> {
        let (sender, jobs) = unbounded::<Job>();
        let mut scope = RemoteScope::new(&config);

        let worker = thread::Builder::new()
            .name("crossbridge-remote".into())
            .spawn(move || {
                info!("remote runtime started");
                for job in jobs.iter() {
                    job(&mut scope);
                }
                scope.close();
            })?;

        Ok(Self {
            shared: Arc::new(RuntimeShared {
                jobs: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                config,
            }),
        })
    }

    /// Queue `f` on the runtime thread.
    ///
    /// A panicking job fails its own call only. Once the runtime stopped,
    /// every call fails with a boundary invocation error.
    pub fn execute<R, F>(&self, f: F) -> PendingCall<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut RemoteScope) -> Result<R> + Send + 'static,
    {
        let (reply, call) = PendingCall::channel();
        let job: Job = Box::new(move |scope: &mut RemoteScope| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(scope))).unwrap_or_else(|_| {
                warn!("remote job panicked");
                Err(BridgeError::boundary("remote call panicked"))
            });
            let _ = reply.send(result);
        });

        let sent = match self.shared.jobs.lock().as_ref() {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        };
        if sent {
            call
        } else {
            PendingCall::failed(BridgeError::boundary(STOPPED))
        }
    }

    /// Publish an observable and hand back its handle.
    pub fn publish_observable<O>(&self, observable: O) -> PendingCall<HandleId>
    where
        O: RemoteObservable + 'static,
    {
        let observable: Arc<dyn RemoteObservable> = Arc::new(observable);
        self.execute(move |scope| Ok(scope.publish(RemoteObject::Observable(observable))))
    }

    /// Publish a service callable through `invoke`.
    pub fn publish_service<S>(&self, service: S) -> PendingCall<HandleId>
    where
        S: RemoteService + 'static,
    {
        let service: Arc<dyn RemoteService> = Arc::new(service);
        self.execute(move |scope| Ok(scope.publish(RemoteObject::Service(service))))
    }

    /// Make `handle` discoverable under `key`.
    pub fn register_container(&self, key: impl Into<String>, handle: HandleId) -> PendingCall<()> {
        let key = key.into();
        self.execute(move |scope| scope.register_container(&key, handle))
    }

    /// Remove `key` from discovery.
    pub fn unregister_container(&self, key: impl Into<String>) -> PendingCall<Option<HandleId>> {
        let key = key.into();
        self.execute(move |scope| Ok(scope.unregister_container(&key)))
    }

    /// Handle registered under `key`, if any.
    pub fn lookup_container(&self, key: impl Into<String>) -> PendingCall<Option<HandleId>> {
        let key = key.into();
        self.execute(move |scope| Ok(scope.lookup_container(&key)))
    }

    /// Release a published object. A second release reports `AlreadyDisposed`.
    pub fn release(&self, handle: HandleId) -> PendingCall<()> {
        self.execute(move |scope| scope.release(handle))
    }

    /// Stop the runtime after the queued jobs ran. Every published object
    /// is released and live forwarders report an error to their consumers.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Whether the runtime still accepts jobs.
    pub fn is_running(&self) -> bool {
        self.shared.jobs.lock().is_some()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> WireCodec {
        self.shared.config.codec
    }
}
