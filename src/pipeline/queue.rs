//! Bounded FIFO buffer owned by one stage.
//!
//! Backed by a bounded crossbeam channel whose both ends live in the queue.
//! Any number of producers may push concurrently; the stage's drain worker is
//! the single consumer. Because the queue holds its own receiver the channel
//! never disconnects while the stage is alive.

use crate::config::BackpressurePolicy;
use crate::error::PipelineError;
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::fmt;
use std::time::Duration;

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// The item was appended without disturbing the buffer.
    Accepted,
    /// The item was appended after evicting this many of the oldest items.
    Evicted(usize),
}

/// A record that could not be enqueued, handed back with the reason.
pub struct Rejected<T> {
    pub item: T,
    pub error: PipelineError,
}

impl<T> Rejected<T> {
    pub fn new(item: T, error: PipelineError) -> Self {
        Self { item, error }
    }

    pub fn into_inner(self) -> T {
        self.item
    }

    pub fn into_error(self) -> PipelineError {
        self.error
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish()
    }
}

/// Bounded multi-producer / single-consumer FIFO.
pub struct StageQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl<T> StageQueue<T> {
    /// `capacity` must be non-zero; a zero-capacity channel is a rendezvous
    /// point, not a buffer.
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        debug_assert!(capacity > 0);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
        }
    }

    /// Append to the tail, applying the backpressure policy when full.
    ///
    /// Returns the item back only when the policy is `Reject` and the buffer
    /// is full.
    pub fn push(&self, item: T) -> Result<Pushed, T> {
        match self.policy {
            BackpressurePolicy::Reject => match self.tx.try_send(item) {
                Ok(()) => Ok(Pushed::Accepted),
                Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => Err(item),
            },
            BackpressurePolicy::Block => match self.tx.send(item) {
                Ok(()) => Ok(Pushed::Accepted),
                Err(err) => Err(err.into_inner()),
            },
            BackpressurePolicy::DropOldest => {
                let mut item = item;
                let mut evicted = 0;
                loop {
                    match self.tx.try_send(item) {
                        Ok(()) if evicted == 0 => return Ok(Pushed::Accepted),
                        Ok(()) => return Ok(Pushed::Evicted(evicted)),
                        Err(TrySendError::Full(back)) => {
                            item = back;
                            if self.rx.try_recv().is_ok() {
                                evicted += 1;
                            }
                        }
                        Err(TrySendError::Disconnected(back)) => return Err(back),
                    }
                }
            }
        }
    }

    /// Like a `Block` push, but gives the item back if no slot frees up
    /// within `timeout`.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<Pushed, T> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(Pushed::Accepted),
            Err(SendTimeoutError::Timeout(item)) | Err(SendTimeoutError::Disconnected(item)) => {
                Err(item)
            }
        }
    }

    /// Remove the head item, or `None` when empty. Never blocks.
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the head item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Consumer end, for waiting on the queue alongside other channels.
    pub(crate) fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}
