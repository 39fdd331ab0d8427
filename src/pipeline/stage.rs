//! Buffered forwarding stage.
//!
//! A [`Stage`] owns one bounded queue and a route: either a link to the next
//! stage's queue or, for the terminal stage, a [`SinkAction`]. A dedicated
//! drain worker thread is the only consumer of the queue; it forwards every
//! record through [`Stage::send_to_next_step`] semantics with retries.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init()──► Ready ──start()──► Running ──begin_drain()──► Draining ──► Stopped
//! ```
//!
//! Draining is irreversible. A draining stage refuses new records, flushes
//! what it holds, then closes its sink or tells the next stage to drain.

use crate::config::{BackpressurePolicy, StageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::event::{
    publish, StageEvent, StageStats, StageStatsSnapshot, EVENT_CHANNEL_CAPACITY,
};
use crate::pipeline::queue::{Pushed, Rejected, StageQueue};
use crate::pipeline::sink::SinkAction;
use crate::pipeline::worker::DrainWorker;
use crate::record::EventRecord;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a blocked producer waits for a free slot before re-checking
/// whether the stage still accepts input.
const BLOCKED_PUSH_RECHECK: Duration = Duration::from_millis(10);

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StageState {
    Uninitialized = 0,
    Ready = 1,
    Running = 2,
    Draining = 3,
    Stopped = 4,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Uninitialized,
            1 => StageState::Ready,
            2 => StageState::Running,
            3 => StageState::Draining,
            _ => StageState::Stopped,
        }
    }

    /// Whether the stage accepts new records in this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, StageState::Ready | StageState::Running)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State reachable from producers, the drain worker and upstream links.
pub(crate) struct StageShared<T> {
    name: String,
    state: AtomicU8,
    /// Held shared by producers while enqueueing and exclusively while
    /// entering Draining, so no record lands after the worker saw Draining.
    intake: RwLock<()>,
    queue: OnceLock<StageQueue<T>>,
    stats: StageStats,
    events: Sender<StageEvent>,
    /// Signalled once on entering Draining so an idle worker stops waiting.
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl<T> StageShared<T> {
    fn new(name: String, events: Sender<StageEvent>) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            name,
            state: AtomicU8::new(StageState::Uninitialized as u8),
            intake: RwLock::new(()),
            queue: OnceLock::new(),
            stats: StageStats::default(),
            events,
            wake_tx,
            wake_rx,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn stats(&self) -> &StageStats {
        &self.stats
    }

    pub(crate) fn events(&self) -> &Sender<StageEvent> {
        &self.events
    }

    pub(crate) fn wake(&self) -> &Receiver<()> {
        &self.wake_rx
    }

    pub(crate) fn queue(&self) -> PipelineResult<&StageQueue<T>> {
        self.queue.get().ok_or_else(|| PipelineError::NotInitialized {
            stage: self.name.clone(),
        })
    }

    /// Enqueue under the stage's backpressure policy.
    ///
    /// A `Block` producer waits for space in short slices and releases the
    /// intake lock between them so a concurrent drain can get in. It gives up
    /// with `StageClosed` once the stage stops accepting input.
    pub(crate) fn offer(&self, item: T) -> Result<(), Rejected<T>> {
        let queue = match self.queue() {
            Ok(queue) => queue,
            Err(err) => return Err(Rejected::new(item, err)),
        };

        let mut item = item;
        loop {
            let _intake = self.intake.read().unwrap_or_else(PoisonError::into_inner);
            if !self.state().accepts_input() {
                self.stats.record_rejected();
                return Err(Rejected::new(
                    item,
                    PipelineError::StageClosed {
                        stage: self.name.clone(),
                    },
                ));
            }

            let pushed = match queue.policy() {
                BackpressurePolicy::Block => queue.push_timeout(item, BLOCKED_PUSH_RECHECK),
                _ => queue.push(item),
            };
            match pushed {
                Err(back) if queue.policy() == BackpressurePolicy::Block => item = back,
                pushed => return self.settle(queue, pushed),
            }
        }
    }

    fn settle(&self, queue: &StageQueue<T>, pushed: Result<Pushed, T>) -> Result<(), Rejected<T>> {
        match pushed {
            Ok(Pushed::Accepted) => {
                self.stats.record_enqueued();
                Ok(())
            }
            Ok(Pushed::Evicted(count)) => {
                self.stats.record_enqueued();
                self.stats.record_evicted(count);
                tracing::debug!("Stage '{}' evicted {} oldest record(s)", self.name, count);
                publish(
                    &self.events,
                    StageEvent::Evicted {
                        stage: self.name.clone(),
                        count,
                    },
                );
                Ok(())
            }
            Err(item) => {
                self.stats.record_rejected();
                Err(Rejected::new(
                    item,
                    PipelineError::QueueFull {
                        stage: self.name.clone(),
                        capacity: queue.capacity(),
                    },
                ))
            }
        }
    }

    /// Enter Draining. Returns `true` if this call performed the transition.
    pub(crate) fn begin_drain(&self) -> bool {
        let _intake = self.intake.write().unwrap_or_else(PoisonError::into_inner);
        match self.state() {
            StageState::Ready | StageState::Running => {
                self.set_state(StageState::Draining);
                let _ = self.wake_tx.try_send(());
                tracing::debug!("Stage '{}' draining", self.name);
                true
            }
            StageState::Uninitialized => {
                self.set_state(StageState::Stopped);
                false
            }
            StageState::Draining | StageState::Stopped => false,
        }
    }
}

/// Non-owning handle to a stage's intake, held by the upstream stage.
pub struct StageLink<T> {
    shared: Arc<StageShared<T>>,
}

impl<T> Clone for StageLink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StageLink<T> {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn state(&self) -> StageState {
        self.shared.state()
    }

    /// Enqueue into the linked stage.
    pub fn add_to_queue(&self, item: T) -> PipelineResult<()> {
        self.shared.offer(item).map_err(Rejected::into_error)
    }

    pub(crate) fn offer(&self, item: T) -> Result<(), Rejected<T>> {
        self.shared.offer(item)
    }

    /// Tell the linked stage no further records will arrive.
    pub(crate) fn begin_drain(&self) {
        self.shared.begin_drain();
    }
}

/// Where a stage sends drained records.
pub(crate) enum Route<T: EventRecord> {
    Next(StageLink<T>),
    Terminal(Box<dyn SinkAction<T>>),
    Unlinked,
}

impl<T: EventRecord> Route<T> {
    /// One delivery attempt. The record comes back on failure so it can be retried.
    pub(crate) fn forward(&mut self, stage: &str, item: T) -> Result<(), Rejected<T>> {
        match self {
            Route::Next(link) => link.offer(item).map_err(|rejected| {
                let Rejected { item, error } = rejected;
                let error = match error {
                    PipelineError::QueueFull { .. } => error,
                    other => PipelineError::DownstreamUnavailable {
                        stage: stage.to_string(),
                        reason: other.to_string(),
                    },
                };
                Rejected::new(item, error)
            }),
            Route::Terminal(sink) => sink.persist(&item).map_err(|e| Rejected::new(item, e)),
            Route::Unlinked => Err(Rejected::new(
                item,
                PipelineError::DownstreamUnavailable {
                    stage: stage.to_string(),
                    reason: "no next stage or sink".to_string(),
                },
            )),
        }
    }

    /// Called once the stage's buffer is flushed at shutdown.
    pub(crate) fn finish(&mut self, stage: &str) {
        match self {
            Route::Next(link) => link.begin_drain(),
            Route::Terminal(sink) => {
                if let Err(e) = sink.close() {
                    tracing::error!(
                        "Sink '{}' of stage '{}' failed to close: {}",
                        sink.name(),
                        stage,
                        e
                    );
                }
            }
            Route::Unlinked => {}
        }
    }
}

/// A buffered forwarding unit, generic over the pipeline's record type.
pub struct Stage<T: EventRecord> {
    shared: Arc<StageShared<T>>,
    route: Arc<Mutex<Route<T>>>,
    config: StageConfig,
    events_rx: Receiver<StageEvent>,
    worker: Option<JoinHandle<()>>,
}

impl<T: EventRecord> Stage<T> {
    /// A stage that forwards to a next stage once linked.
    pub fn forwarding(name: impl Into<String>, config: StageConfig) -> Self {
        Self::with_route(name.into(), config, Route::Unlinked, bounded(EVENT_CHANNEL_CAPACITY))
    }

    /// A terminal stage that persists through `sink`.
    pub fn sink(name: impl Into<String>, config: StageConfig, sink: impl SinkAction<T>) -> Self {
        Self::with_route(
            name.into(),
            config,
            Route::Terminal(Box::new(sink)),
            bounded(EVENT_CHANNEL_CAPACITY),
        )
    }

    pub(crate) fn with_route(
        name: String,
        config: StageConfig,
        route: Route<T>,
        (events_tx, events_rx): (Sender<StageEvent>, Receiver<StageEvent>),
    ) -> Self {
        Self {
            shared: Arc::new(StageShared::new(name, events_tx)),
            route: Arc::new(Mutex::new(route)),
            config,
            events_rx,
            worker: None,
        }
    }

    // ── Wiring ──

    /// Handle the previous stage uses to forward into this one.
    pub fn link(&self) -> StageLink<T> {
        StageLink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Set the next stage. Only allowed before `init()`, and never on a sink.
    pub fn set_next(&mut self, next: StageLink<T>) -> PipelineResult<()> {
        if self.state() != StageState::Uninitialized {
            return Err(PipelineError::Config(format!(
                "Stage '{}' cannot be rewired once initialized",
                self.name()
            )));
        }
        let mut route = self.route.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*route, Route::Terminal(_)) {
            return Err(PipelineError::Config(format!(
                "Sink stage '{}' cannot have a next stage",
                self.name()
            )));
        }
        *route = Route::Next(next);
        Ok(())
    }

    // ── Lifecycle ──

    /// Allocate the queue and prepare the sink, if any. Idempotent.
    pub fn init(&mut self) -> PipelineResult<&mut Self> {
        if self.state() != StageState::Uninitialized {
            return Ok(self);
        }

        self.config.validate()?;
        {
            let mut route = self.route.lock().unwrap_or_else(PoisonError::into_inner);
            if let Route::Terminal(sink) = &mut *route {
                sink.prepare()?;
                tracing::info!("Stage '{}' prepared sink '{}'", self.name(), sink.name());
            }
        }

        let queue = StageQueue::new(self.config.capacity, self.config.backpressure);
        // A fresh stage has no queue yet, so this cannot collide.
        let _ = self.shared.queue.set(queue);
        self.shared.set_state(StageState::Ready);

        tracing::debug!(
            "Stage '{}' initialized (capacity {}, {:?})",
            self.name(),
            self.config.capacity,
            self.config.backpressure
        );
        Ok(self)
    }

    /// Spawn the drain worker.
    pub fn start(&mut self) -> PipelineResult<()> {
        match self.state() {
            StageState::Uninitialized => {
                return Err(PipelineError::NotInitialized {
                    stage: self.name().to_string(),
                })
            }
            StageState::Ready => {}
            StageState::Running => return Ok(()),
            StageState::Draining | StageState::Stopped => {
                return Err(PipelineError::StageClosed {
                    stage: self.name().to_string(),
                })
            }
        }

        let worker = self.drain_worker();
        let handle = std::thread::Builder::new()
            .name(format!("stage-{}", self.name()))
            .spawn(move || worker.run())?;

        self.shared.set_state(StageState::Running);
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop intake. The worker flushes the buffer and then cascades downstream.
    pub fn begin_drain(&self) {
        self.shared.begin_drain();
    }

    /// Drain and wait for this stage to stop.
    ///
    /// A stage that was initialised but never started is drained on the
    /// calling thread.
    pub fn shutdown(&mut self) -> PipelineResult<StageStatsSnapshot> {
        let was_ready = self.state() == StageState::Ready;
        self.begin_drain();

        if self.worker.is_some() {
            self.join()?;
        } else if was_ready {
            self.drain_worker().flush_and_stop();
        }
        Ok(self.stats())
    }

    /// Wait for the drain worker to exit.
    pub(crate) fn join(&mut self) -> PipelineResult<()> {
        if let Some(handle) = self.worker.take() {
            handle.join().map_err(|_| {
                self.shared.set_state(StageState::Stopped);
                PipelineError::WorkerPanicked {
                    stage: self.name().to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Abandon an initialised stage that never started.
    pub(crate) fn abort(&mut self) {
        if self.worker.is_none() {
            self.shared.set_state(StageState::Stopped);
        }
    }

    fn drain_worker(&self) -> DrainWorker<T> {
        DrainWorker::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.route),
            self.config.retry,
            self.config.idle_poll_interval(),
        )
    }

    // ── Queue operations ──

    /// Append a record to the tail of this stage's buffer.
    pub fn add_to_queue(&self, item: T) -> PipelineResult<()> {
        self.try_add_to_queue(item).map_err(Rejected::into_error)
    }

    /// Like [`add_to_queue`](Self::add_to_queue) but hands the record back on failure.
    pub fn try_add_to_queue(&self, item: T) -> Result<(), Rejected<T>> {
        self.shared.offer(item)
    }

    /// Remove the head record, or `None` when the buffer is empty.
    ///
    /// Once the stage is running its worker is the consumer; this is meant
    /// for stages driven by hand.
    pub fn de_queue(&self) -> PipelineResult<Option<T>> {
        Ok(self.shared.queue()?.pop())
    }

    /// Forward one record: into the next stage, or through the sink.
    pub fn send_to_next_step(&self, item: T) -> PipelineResult<()> {
        self.shared.queue()?;
        let mut route = self.route.lock().unwrap_or_else(PoisonError::into_inner);
        route.forward(self.name(), item).map_err(Rejected::into_error)
    }

    /// Number of buffered records.
    pub fn get_queue_size(&self) -> PipelineResult<usize> {
        Ok(self.shared.queue()?.len())
    }

    // ── Accessors ──

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn state(&self) -> StageState {
        self.shared.state()
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn is_sink(&self) -> bool {
        matches!(
            *self.route.lock().unwrap_or_else(PoisonError::into_inner),
            Route::Terminal(_)
        )
    }

    pub fn stats(&self) -> StageStatsSnapshot {
        self.shared.stats().snapshot()
    }

    /// Receiver for this stage's observability events.
    pub fn events(&self) -> Receiver<StageEvent> {
        self.events_rx.clone()
    }
}

impl<T: EventRecord> Drop for Stage<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.begin_drain();
            if let Err(e) = self.join() {
                tracing::error!("{}", e);
            }
        }
    }
}

impl<T: EventRecord> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
