//! Drain worker: the single consumer of a stage's queue.
//!
//! The loop waits on the queue and on the stage's wake signal together,
//! forwarding whatever arrives and re-checking the stage state every idle poll
//! interval. Entering Draining fires the wake signal, so an idle worker reacts
//! at once. It then flushes its buffer, closes the route (sink close, or drain
//! signal to the next stage) and marks the stage Stopped.

use crate::config::RetryPolicy;
use crate::pipeline::event::{publish, StageEvent};
use crate::pipeline::queue::Rejected;
use crate::pipeline::stage::{Route, StageShared, StageState};
use crate::record::EventRecord;
use crossbeam_channel::select;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub(crate) struct DrainWorker<T: EventRecord> {
    shared: Arc<StageShared<T>>,
    route: Arc<Mutex<Route<T>>>,
    retry: RetryPolicy,
    idle_poll: Duration,
}

impl<T: EventRecord> DrainWorker<T> {
    pub(crate) fn new(
        shared: Arc<StageShared<T>>,
        route: Arc<Mutex<Route<T>>>,
        retry: RetryPolicy,
        idle_poll: Duration,
    ) -> Self {
        Self {
            shared,
            route,
            retry,
            idle_poll,
        }
    }

    /// Thread body.
    pub(crate) fn run(self) {
        let name = self.shared.name().to_string();
        tracing::info!("Stage '{}' worker started", name);
        publish(
            self.shared.events(),
            StageEvent::Started {
                stage: name.clone(),
            },
        );

        let Ok(queue) = self.shared.queue() else {
            tracing::error!("Stage '{}' worker started without a queue", name);
            self.shared.set_state(StageState::Stopped);
            return;
        };

        loop {
            select! {
                recv(queue.receiver()) -> item => match item {
                    Ok(item) => self.deliver(item),
                    Err(_) => break,
                },
                recv(self.shared.wake()) -> _ => break,
                default(self.idle_poll) => {
                    if self.shared.state() == StageState::Draining {
                        break;
                    }
                }
            }
        }

        self.flush_and_stop();
        tracing::info!("Stage '{}' worker exiting", name);
    }

    /// Forward every remaining record, close the route and mark the stage Stopped.
    pub(crate) fn flush_and_stop(&self) {
        if let Ok(queue) = self.shared.queue() {
            while let Some(item) = queue.pop() {
                self.deliver(item);
            }
        }

        self.route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(self.shared.name());

        self.shared.set_state(StageState::Stopped);
        let stats = self.shared.stats().snapshot();
        tracing::debug!("Stage '{}' stopped: {:?}", self.shared.name(), stats);
        publish(
            self.shared.events(),
            StageEvent::Stopped {
                stage: self.shared.name().to_string(),
                stats,
            },
        );
    }

    /// Deliver one record, retrying retryable failures per the stage policy.
    fn deliver(&self, item: T) {
        let name = self.shared.name();
        let stats = self.shared.stats();
        let mut item = item;
        let mut attempt = 1;

        loop {
            let result = self
                .route
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .forward(name, item);

            match result {
                Ok(()) => {
                    stats.record_forwarded();
                    return;
                }
                Err(Rejected { item: back, error })
                    if error.is_retryable() && attempt < self.retry.max_attempts =>
                {
                    tracing::warn!(
                        "Stage '{}' delivery attempt {}/{} failed: {}",
                        name,
                        attempt,
                        self.retry.max_attempts,
                        error
                    );
                    stats.record_retry();
                    std::thread::sleep(self.retry.delay_after(attempt));
                    attempt += 1;
                    item = back;
                }
                Err(Rejected { error, .. }) => {
                    stats.record_failed();
                    tracing::error!(
                        "Stage '{}' dropped a record after {} attempt(s): {}",
                        name,
                        attempt,
                        error
                    );
                    publish(
                        self.shared.events(),
                        StageEvent::DeliveryFailed {
                            stage: name.to_string(),
                            attempts: attempt,
                            error: error.to_string(),
                        },
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{RetryPolicy, StageConfig};
    use crate::error::{PipelineError, PipelineResult};
    use crate::pipeline::event::StageEvent;
    use crate::pipeline::sink::SinkAction;
    use crate::pipeline::stage::{Stage, StageState};
    use crate::record::EventRecord;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq)]
    struct Ev(u32);
    impl EventRecord for Ev {}

    /// Fails the first `failures` persist calls with the given error kind.
    struct FlakySink {
        failures: u32,
        calls: Arc<AtomicU32>,
        persisted: Arc<Mutex<Vec<u32>>>,
        retryable: bool,
    }

    impl SinkAction<Ev> for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn prepare(&mut self) -> PipelineResult<()> {
            Ok(())
        }

        fn persist(&mut self, record: &Ev) -> PipelineResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    PipelineError::Timeout {
                        stage: "flaky".to_string(),
                        timeout_ms: 1,
                    }
                } else {
                    PipelineError::Serialization("bad record".to_string())
                });
            }
            self.persisted.lock().unwrap().push(record.0);
            Ok(())
        }
    }

    fn flaky(failures: u32, retryable: bool) -> (FlakySink, Arc<AtomicU32>, Arc<Mutex<Vec<u32>>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let persisted = Arc::new(Mutex::new(Vec::new()));
        let sink = FlakySink {
            failures,
            calls: Arc::clone(&calls),
            persisted: Arc::clone(&persisted),
            retryable,
        };
        (sink, calls, persisted)
    }

    fn config(max_attempts: u32) -> StageConfig {
        StageConfig::with_capacity(16)
            .retry(RetryPolicy {
                max_attempts,
                backoff_ms: 1,
            })
            .idle_poll(Duration::from_millis(5))
    }

    #[test]
    fn test_retryable_failure_is_retried_until_success() {
        let (sink, calls, persisted) = flaky(2, true);
        let mut stage = Stage::sink("hdfs", config(3), sink);
        stage.init().unwrap();
        stage.start().unwrap();

        stage.add_to_queue(Ev(42)).unwrap();
        let stats = stage.shutdown().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*persisted.lock().unwrap(), vec![42]);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_exhausted_retries_surface_on_event_channel() {
        let (sink, calls, persisted) = flaky(10, true);
        let mut stage = Stage::sink("hdfs", config(3), sink);
        let events = stage.events();
        stage.init().unwrap();
        stage.start().unwrap();

        stage.add_to_queue(Ev(1)).unwrap();
        let stats = stage.shutdown().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(persisted.lock().unwrap().is_empty());
        assert_eq!(stats.failed, 1);

        let failures: Vec<_> = events
            .try_iter()
            .filter_map(|e| match e {
                StageEvent::DeliveryFailed { attempts, .. } => Some(attempts),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![3]);
    }

    #[test]
    fn test_non_retryable_failure_is_not_retried() {
        let (sink, calls, _) = flaky(1, false);
        let mut stage = Stage::sink("hdfs", config(5), sink);
        stage.init().unwrap();
        stage.start().unwrap();

        stage.add_to_queue(Ev(1)).unwrap();
        stage.add_to_queue(Ev(2)).unwrap();
        let stats = stage.shutdown().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.retries, 0);
    }

    #[test]
    fn test_idle_worker_wakes_on_drain() {
        let (sink, _, _) = flaky(0, true);
        let mut stage = Stage::sink(
            "hdfs",
            config(1).idle_poll(Duration::from_millis(u64::MAX)),
            sink,
        );
        stage.init().unwrap();
        stage.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        stage.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert_eq!(stage.state(), StageState::Stopped);
    }

    #[test]
    fn test_stopped_event_published_on_shutdown() {
        let (sink, _, _) = flaky(0, true);
        let mut stage = Stage::sink("hdfs", config(1), sink);
        let events = stage.events();
        stage.init().unwrap();
        stage.start().unwrap();
        stage.shutdown().unwrap();

        let kinds: Vec<_> = events.try_iter().collect();
        assert!(matches!(kinds.first(), Some(StageEvent::Started { .. })));
        assert!(matches!(kinds.last(), Some(StageEvent::Stopped { .. })));
    }
}
