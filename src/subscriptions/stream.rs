//! Pull variant of a boundary subscription.

use super::link::{Link, Step};
use super::types::CancellationToken;
use crate::error::Result;
use crossbeam_channel::Receiver;
use serde::de::DeserializeOwned;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use tracing::warn;

/// A remote event source consumed as a lazy, blocking sequence.
///
/// Ends when the source completes, after the first error, or once
/// cancelled. Not restartable. Cancelling or dropping the stream releases
/// the far-side forwarder.
pub struct EventStream<T> {
    link: Link,
    stop: Receiver<()>,
    token: CancellationToken,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EventStream<T> {
    pub(crate) fn new(link: Link) -> Self {
        let (token, stop) = CancellationToken::new();
        Self {
            link,
            stop,
            token,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// A token that ends this stream from any thread, including while
    /// another thread is blocked in `next`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// End the stream now and wait for the far side to release it.
    pub fn teardown(mut self) -> Result<()> {
        self.finished = true;
        self.link.release()
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Err(e) = self.link.release() {
            warn!(consumer = %self.link.id(), error = %e, "stream teardown failed");
        }
    }
}

impl<T: DeserializeOwned> Iterator for EventStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.token.is_cancelled() {
            self.finish();
            return None;
        }

        match self.link.next_step(&self.stop) {
            Step::Next(value) => Some(Ok(value)),
            Step::Failed(e) => {
                self.finish();
                Some(Err(e))
            }
            Step::Completed | Step::Stopped => {
                self.finish();
                None
            }
        }
    }
}

impl<T: DeserializeOwned> FusedIterator for EventStream<T> {}
