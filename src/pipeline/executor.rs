//! Pipeline construction and lifecycle.
//!
//! The builder:
//! 1. Creates every stage against one shared event channel.
//! 2. Wires each stage's next link before any `init()`.
//! 3. Initialises head-to-tail; the first failure aborts the whole build.
//! 4. Starts drain workers tail-to-head so consumers exist before producers.
//!
//! Shutdown is signalled at the head and cascades stage by stage down to the
//! sink; workers are then joined tail-to-head.

use crate::config::{PipelineConfig, StageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::event::{StageEvent, StageStatsSnapshot, EVENT_CHANNEL_CAPACITY};
use crate::pipeline::queue::Rejected;
use crate::pipeline::sink::SinkAction;
use crate::pipeline::stage::{Route, Stage, StageState};
use crate::record::EventRecord;
use crossbeam_channel::{bounded, Receiver};

struct StageSpec<T: EventRecord> {
    name: String,
    config: StageConfig,
    sink: Option<Box<dyn SinkAction<T>>>,
}

/// Collects stages and builds a running [`Pipeline`].
pub struct PipelineBuilder<T: EventRecord> {
    stages: Vec<StageSpec<T>>,
    sink: Option<StageSpec<T>>,
    event_capacity: usize,
}

impl<T: EventRecord> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EventRecord> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            sink: None,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Forwarding stages and sink settings from a config file; the sink
    /// action itself is supplied by the caller.
    pub fn from_config(config: &PipelineConfig, sink: impl SinkAction<T>) -> Self {
        let mut builder = Self::new();
        for (name, stage_config) in config.stage_configs() {
            builder = builder.stage(name, stage_config);
        }
        builder.sink(config.sink.stage.name.clone(), config.sink_config(), sink)
    }

    /// Append a forwarding stage.
    pub fn stage(mut self, name: impl Into<String>, config: StageConfig) -> Self {
        self.stages.push(StageSpec {
            name: name.into(),
            config,
            sink: None,
        });
        self
    }

    /// Set the terminal stage.
    pub fn sink(
        mut self,
        name: impl Into<String>,
        config: StageConfig,
        sink: impl SinkAction<T>,
    ) -> Self {
        self.sink = Some(StageSpec {
            name: name.into(),
            config,
            sink: Some(Box::new(sink)),
        });
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Wire, initialise and start every stage.
    pub fn build(self) -> PipelineResult<Pipeline<T>> {
        let sink = self
            .sink
            .ok_or(PipelineError::Configuration { field: "sink" })?;

        let (events_tx, events_rx) = bounded(self.event_capacity);
        let mut stages: Vec<Stage<T>> = self
            .stages
            .into_iter()
            .chain(std::iter::once(sink))
            .map(|spec| {
                let route = match spec.sink {
                    Some(action) => Route::Terminal(action),
                    None => Route::Unlinked,
                };
                Stage::with_route(
                    spec.name,
                    spec.config,
                    route,
                    (events_tx.clone(), events_rx.clone()),
                )
            })
            .collect();

        for idx in 0..stages.len() - 1 {
            let next = stages[idx + 1].link();
            stages[idx].set_next(next)?;
        }

        for idx in 0..stages.len() {
            let initialized = stages[idx].init().map(|_| ());
            if let Err(e) = initialized {
                let stage = stages[idx].name().to_string();
                tracing::error!("Stage #{} '{}' failed to initialize: {}", idx, stage, e);
                abort(&mut stages);
                return Err(PipelineError::StageInit {
                    index: idx,
                    stage,
                    source: Box::new(e),
                });
            }
        }

        for idx in (0..stages.len()).rev() {
            if let Err(e) = stages[idx].start() {
                tracing::error!("Stage '{}' failed to start: {}", stages[idx].name(), e);
                // Head-to-tail so each stage's drain reaches the next one.
                for stage in stages.iter_mut() {
                    let _ = stage.shutdown();
                }
                return Err(e);
            }
        }

        tracing::info!(
            "Pipeline started: {}",
            stages
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(Pipeline {
            stages,
            events_rx,
            shut_down: false,
        })
    }
}

fn abort<T: EventRecord>(stages: &mut [Stage<T>]) {
    for stage in stages.iter_mut() {
        stage.abort();
    }
}

/// An ordered, running chain of stages ending in a sink.
pub struct Pipeline<T: EventRecord> {
    stages: Vec<Stage<T>>,
    events_rx: Receiver<StageEvent>,
    shut_down: bool,
}

impl<T: EventRecord> Pipeline<T> {
    pub fn builder() -> PipelineBuilder<T> {
        PipelineBuilder::new()
    }

    /// Enqueue a record at the head stage.
    pub fn submit(&self, item: T) -> PipelineResult<()> {
        self.head().add_to_queue(item)
    }

    /// Enqueue at the head, handing the record back on failure.
    pub fn try_submit(&self, item: T) -> Result<(), Rejected<T>> {
        self.head().try_add_to_queue(item)
    }

    fn head(&self) -> &Stage<T> {
        // build() always creates at least the sink stage
        &self.stages[0]
    }

    pub fn stages(&self) -> &[Stage<T>] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage<T>> {
        self.stages.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Buffered record count per stage, head first.
    pub fn queue_sizes(&self) -> Vec<(String, usize)> {
        self.stages
            .iter()
            .map(|s| (s.name().to_string(), s.get_queue_size().unwrap_or(0)))
            .collect()
    }

    /// Drain all pending stage events.
    pub fn drain_events(&self) -> Vec<StageEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Receiver for stage events, for observers on other threads.
    pub fn events(&self) -> Receiver<StageEvent> {
        self.events_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shut_down
            && self
                .stages
                .iter()
                .all(|s| s.state() == StageState::Running)
    }

    /// Drain every stage head-to-tail and wait for all workers.
    ///
    /// Returns each stage's final statistics, head first.
    pub fn shutdown(&mut self) -> PipelineResult<Vec<(String, StageStatsSnapshot)>> {
        if !self.shut_down {
            self.shut_down = true;
            tracing::info!("Pipeline shutting down");
            self.head().begin_drain();

            let mut first_error = None;
            for stage in self.stages.iter_mut().rev() {
                if let Err(e) = stage.join() {
                    tracing::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
            tracing::info!("Pipeline stopped");
        }

        Ok(self
            .stages
            .iter()
            .map(|s| (s.name().to_string(), s.stats()))
            .collect())
    }
}

impl<T: EventRecord> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl<T: EventRecord> Drop for Pipeline<T> {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Ev(u32);
    impl EventRecord for Ev {}

    struct VecSink {
        out: Arc<Mutex<Vec<u32>>>,
        valid: bool,
    }

    impl SinkAction<Ev> for VecSink {
        fn name(&self) -> &str {
            "vec"
        }

        fn prepare(&mut self) -> PipelineResult<()> {
            if self.valid {
                Ok(())
            } else {
                Err(PipelineError::Configuration { field: "address" })
            }
        }

        fn persist(&mut self, record: &Ev) -> PipelineResult<()> {
            self.out.lock().unwrap().push(record.0);
            Ok(())
        }
    }

    fn config() -> StageConfig {
        StageConfig::with_capacity(256)
            .retry(RetryPolicy {
                max_attempts: 50,
                backoff_ms: 1,
            })
            .idle_poll(Duration::from_millis(5))
    }

    fn vec_sink(valid: bool) -> (VecSink, Arc<Mutex<Vec<u32>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        (
            VecSink {
                out: Arc::clone(&out),
                valid,
            },
            out,
        )
    }

    #[test]
    fn test_pipeline_without_sink_is_rejected() {
        let err = PipelineBuilder::<Ev>::new()
            .stage("ingest", config())
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("sink"));
    }

    #[test]
    fn test_records_flow_head_to_sink_in_order() {
        let (sink, out) = vec_sink(true);
        let mut pipeline = Pipeline::builder()
            .stage("ingest", config())
            .stage("buffer", config())
            .sink("hdfs", config(), sink)
            .build()
            .unwrap();
        assert_eq!(pipeline.len(), 3);
        assert!(pipeline.is_running());

        for i in 0..100 {
            pipeline.submit(Ev(i)).unwrap();
        }
        let stats = pipeline.shutdown().unwrap();

        assert_eq!(*out.lock().unwrap(), (0..100).collect::<Vec<_>>());
        let names: Vec<_> = stats.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["ingest", "buffer", "hdfs"]);
        assert!(stats.iter().all(|(_, s)| s.forwarded == 100));
        assert!(pipeline
            .stages()
            .iter()
            .all(|s| s.state() == StageState::Stopped));
    }

    #[test]
    fn test_failed_sink_init_aborts_build() {
        let (sink, _) = vec_sink(false);
        let err = Pipeline::builder()
            .stage("ingest", config())
            .sink("hdfs", config(), sink)
            .build()
            .unwrap_err();

        match err {
            PipelineError::StageInit { index, stage, source } => {
                assert_eq!(index, 1);
                assert_eq!(stage, "hdfs");
                assert_eq!(source.field(), Some("address"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_stage_config_names_stage() {
        let (sink, _) = vec_sink(true);
        let err = Pipeline::builder()
            .stage("ingest", StageConfig::with_capacity(0))
            .sink("hdfs", config(), sink)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageInit { index: 0, .. }));
        assert_eq!(err.field(), Some("capacity"));
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let (sink, _) = vec_sink(true);
        let mut pipeline = Pipeline::builder()
            .sink("hdfs", config(), sink)
            .build()
            .unwrap();
        pipeline.shutdown().unwrap();
        assert!(matches!(
            pipeline.submit(Ev(1)),
            Err(PipelineError::StageClosed { .. })
        ));
        // Second shutdown is a no-op
        assert!(pipeline.shutdown().is_ok());
    }

    #[test]
    fn test_from_config_builds_configured_stages() {
        let config = PipelineConfig::from_toml_str(
            r#"
[[stages]]
name = "ingest"

[[stages]]
name = "buffer"
capacity = 8

[sink]
name = "store"
"#,
        )
        .unwrap();
        let (sink, _) = vec_sink(true);
        let pipeline = PipelineBuilder::from_config(&config, sink).build().unwrap();

        let names: Vec<_> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["ingest", "buffer", "store"]);
        assert_eq!(pipeline.stage("buffer").unwrap().config().capacity, 8);
        assert!(pipeline.stage("store").unwrap().is_sink());
    }

    #[test]
    fn test_drop_drains_pipeline() {
        let (sink, out) = vec_sink(true);
        {
            let pipeline = Pipeline::builder()
                .stage("ingest", config())
                .sink("hdfs", config(), sink)
                .build()
                .unwrap();
            for i in 0..10 {
                pipeline.submit(Ev(i)).unwrap();
            }
        }
        assert_eq!(out.lock().unwrap().len(), 10);
    }
}
