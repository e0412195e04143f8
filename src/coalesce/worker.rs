//! Timer-driven coalescing on a dedicated thread.

use super::reducer::{CoalescedBatch, WindowReducer};
use crate::config::{CoalescerConfig, Telemetry};
use crate::error::Result;
use crate::remote::{EventSubject, ListenerGuard, Relay, RemoteObservable, Signal};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use serde::Serialize;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

type FinishHook = Box<dyn FnOnce() + Send>;

enum Input<K, V> {
    Value(K, V),
    /// Flush everything, run the hook, exit.
    Finish(FinishHook),
    /// Exit without flushing.
    Abort,
}

/// Feeds raw events into a running [`Coalescer`].
pub struct CoalescerInput<K, V> {
    sender: Sender<Input<K, V>>,
}

impl<K, V> Clone for CoalescerInput<K, V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<K, V> CoalescerInput<K, V> {
    /// Returns `false` once the coalescer is gone.
    pub fn push(&self, key: K, value: V) -> bool {
        self.sender.send(Input::Value(key, value)).is_ok()
    }

    /// Emit whatever is buffered right away, then call `then` and stop.
    pub fn finish(&self, then: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Input::Finish(Box::new(then))).is_ok()
    }

    /// Stop after the values already queued, discarding what is buffered.
    pub fn abort(&self) -> bool {
        self.sender.send(Input::Abort).is_ok()
    }
}

/// Two-stage windowed reducer running on its own thread.
///
/// Every half window the stage-one buffers are flushed; every full window
/// the merged batch goes to `emit`, unless nothing survived. Stopping
/// discards what is buffered.
pub struct Coalescer<K, V> {
    input: CoalescerInput<K, V>,
    stop: Sender<()>,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Start the worker thread. `emit` receives each non-empty batch.
    pub fn spawn<F>(config: &CoalescerConfig, telemetry: Telemetry, emit: F) -> Result<Self>
    where
        F: FnMut(CoalescedBatch<K, V>) + Send + 'static,
    {
        let (sender, input) = unbounded();
        let (stop, stop_rx) = bounded(1);
        let active = Arc::new(AtomicBool::new(true));

        let half_window = config.half_window();
        let distinct = config.distinct_until_changed;
        let flag = Arc::clone(&active);
        let worker = thread::Builder::new()
            .name("crossbridge-coalescer".into())
            .spawn(move || {
                let mut run = Run {
                    reducer: WindowReducer::new(distinct),
                    emit,
                    active: flag,
                    telemetry,
                };
                run.drive(tick(half_window), input, stop_rx);
            })?;

        debug!(?half_window, distinct, "coalescer started");
        Ok(Self {
            input: CoalescerInput { sender },
            stop,
            active,
            worker: Some(worker),
        })
    }
}

impl<K, V> Coalescer<K, V> {
    /// Feed one raw event. Returns `false` once stopped.
    pub fn push(&self, key: K, value: V) -> bool {
        self.input.push(key, value)
    }

    /// Get a cloneable feed into this coalescer.
    pub fn input(&self) -> CoalescerInput<K, V> {
        self.input.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop without emitting anything still buffered. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.stop.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("coalescer thread panicked");
            }
        }
    }
}

impl<K, V> Drop for Coalescer<K, V> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Run<K, V, F> {
    reducer: WindowReducer<K, V>,
    emit: F,
    active: Arc<AtomicBool>,
    telemetry: Telemetry,
}

impl<K, V, F> Run<K, V, F>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
    F: FnMut(CoalescedBatch<K, V>),
{
    fn drive(
        &mut self,
        ticks: Receiver<std::time::Instant>,
        input: Receiver<Input<K, V>>,
        stop: Receiver<()>,
    ) {
        let mut second_half = false;
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(input) -> message => match message {
                    Ok(Input::Value(key, value)) => self.reducer.push(key, value),
                    Ok(Input::Finish(then)) => {
                        self.reducer.flush_partitions();
                        self.flush();
                        then();
                        return;
                    }
                    Ok(Input::Abort) | Err(_) => break,
                },
                recv(ticks) -> _ => {
                    self.reducer.flush_partitions();
                    if second_half {
                        self.flush();
                    }
                    second_half = !second_half;
                }
            }
        }

        let pending = self.reducer.pending_len();
        self.reducer.discard();
        trace!(discarded = pending, "coalescer stopped");
    }

    fn flush(&mut self) {
        let Some(batch) = self.reducer.flush_batch() else {
            return;
        };
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        if self.telemetry.log_batches {
            let ratio = batch.raw_events() as f64 / batch.len() as f64;
            info!(
                entries = batch.len(),
                raw = batch.raw_events(),
                ratio = %format_args!("{:.1}", ratio),
                "coalesced batch"
            );
        }
        let emit = &mut self.emit;
        if panic::catch_unwind(AssertUnwindSafe(|| emit(batch))).is_err() {
            warn!("coalesced batch consumer panicked");
        }
    }
}

/// Per-key coalesced view of one or more raw subjects, publishable as a
/// remote observable.
///
/// Each listener gets its own coalescer and receives `Vec<V>` batches. An
/// error on any source fails the stream and drops what is buffered, so no
/// batch follows it. The stream completes once every source completed,
/// after flushing what is buffered.
pub struct CoalescedStream<K, V> {
    sources: Vec<EventSubject<V>>,
    key: Arc<dyn Fn(&V) -> K + Send + Sync>,
    config: CoalescerConfig,
    telemetry: Telemetry,
}

impl<K, V> CoalescedStream<K, V> {
    pub fn new(
        sources: Vec<EventSubject<V>>,
        key: impl Fn(&V) -> K + Send + Sync + 'static,
        config: CoalescerConfig,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            sources,
            key: Arc::new(key),
            config,
            telemetry,
        }
    }
}

impl<K, V> RemoteObservable for CoalescedStream<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + Clone + PartialEq + Send + Sync + 'static,
{
    fn listen(&self, relay: Relay) -> Result<ListenerGuard> {
        let batches = relay.clone();
        let emit = move |batch: CoalescedBatch<K, V>| {
            if let Err(e) = batches.next(&batch.into_values()) {
                debug!(error = %e, "dropping coalesced batch");
            }
        };
        let mut coalescer = Coalescer::spawn(&self.config, self.telemetry.clone(), emit)?;

        let remaining = Arc::new(AtomicUsize::new(self.sources.len()));
        let mut registrations = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let input = coalescer.input();
            let key = Arc::clone(&self.key);
            let relay = relay.clone();
            let remaining = Arc::clone(&remaining);

            let id = source.subscribe(move |signal: &Signal<V>| match signal {
                Signal::Next(value) => {
                    input.push(key(value), value.clone());
                }
                Signal::Error(message) => {
                    if let Err(e) = relay.error(message.clone()) {
                        debug!(error = %e, "relaying source error failed");
                    }
                    input.abort();
                }
                Signal::Completed => {
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        let relay = relay.clone();
                        input.finish(move || {
                            if let Err(e) = relay.completed() {
                                debug!(error = %e, "relaying completion failed");
                            }
                        });
                    }
                }
            });
            registrations.push((source.clone(), id));
        }

        Ok(ListenerGuard::new(move || {
            for (source, id) in registrations {
                source.unsubscribe(id);
            }
            coalescer.stop();
        }))
    }
}
