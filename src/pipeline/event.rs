//! Observability channel and per-stage counters.
//!
//! Workers publish [`StageEvent`]s with `try_send` so a slow or absent
//! observer never stalls the drain loop; when the channel is full the event is
//! dropped and only the counters remain.

use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Channel capacity for stage events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Messages published by stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// The drain worker started.
    Started { stage: String },

    /// Buffered records were evicted under the drop-oldest policy.
    Evicted { stage: String, count: usize },

    /// A record could not be delivered and was dropped.
    DeliveryFailed {
        stage: String,
        attempts: u32,
        error: String,
    },

    /// The stage drained its buffer and stopped.
    Stopped {
        stage: String,
        stats: StageStatsSnapshot,
    },
}

impl StageEvent {
    pub fn stage(&self) -> &str {
        match self {
            StageEvent::Started { stage }
            | StageEvent::Evicted { stage, .. }
            | StageEvent::DeliveryFailed { stage, .. }
            | StageEvent::Stopped { stage, .. } => stage,
        }
    }
}

/// Publish without blocking.
pub(crate) fn publish(tx: &Sender<StageEvent>, event: StageEvent) {
    if tx.try_send(event).is_err() {
        tracing::trace!("Stage event channel full, dropping event");
    }
}

/// Lock-free counters updated by producers and the drain worker.
#[derive(Debug, Default)]
pub struct StageStats {
    enqueued: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    retries: AtomicU64,
}

impl StageStats {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageStatsSnapshot {
        StageStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStatsSnapshot {
    /// Records accepted into the buffer.
    pub enqueued: u64,
    /// Records handed to the next stage or persisted.
    pub forwarded: u64,
    /// Records dropped after delivery failed.
    pub failed: u64,
    /// Enqueue attempts refused (full or closed).
    pub rejected: u64,
    /// Records evicted by the drop-oldest policy.
    pub evicted: u64,
    /// Delivery attempts beyond the first.
    pub retries: u64,
}
