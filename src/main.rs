//! Illuminati relay - Main Entry Point
//!
//! Reads interface events as JSON lines from stdin, pushes them through the
//! configured stages and mirrors them into the HDFS layout on local disk.
//!
//! Usage: `illuminati-relay [config.toml]`

use anyhow::Context;
use illuminati_pipeline::{
    config::{PipelineConfig, DEFAULT_CONFIG_FILE},
    pipeline::{Pipeline, StageEvent},
    record::InterfaceEvent,
    sink::{HdfsSink, LocalFsWriter},
    PipelineBuilder, PipelineError,
};
use std::io::BufRead;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pause before re-offering a record the head stage rejected as full
const RESUBMIT_DELAY: Duration = Duration::from_millis(10);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,illuminati_pipeline=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting illuminati relay");

    // An explicit path must load; the default one may be absent
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => PipelineConfig::load_or_default(DEFAULT_CONFIG_FILE),
    };

    let descriptor = config.connection_descriptor();
    let writer = LocalFsWriter::<InterfaceEvent>::new(config.sink.output_dir.clone());
    let sink = HdfsSink::new(config.sink.stage.name.clone(), descriptor, writer);

    let mut pipeline = PipelineBuilder::from_config(&config, sink)
        .build()
        .context("Failed to build pipeline")?;

    let submitted = relay_stdin(&pipeline)?;
    tracing::info!("Input exhausted after {} event(s), draining", submitted);

    let stats = pipeline.shutdown().context("Pipeline did not shut down cleanly")?;
    log_events(&pipeline);
    for (stage, snapshot) in stats {
        tracing::info!(
            "Stage '{}': enqueued={} forwarded={} failed={} rejected={} evicted={} retries={}",
            stage,
            snapshot.enqueued,
            snapshot.forwarded,
            snapshot.failed,
            snapshot.rejected,
            snapshot.evicted,
            snapshot.retries
        );
    }

    Ok(())
}

fn relay_stdin(pipeline: &Pipeline<InterfaceEvent>) -> anyhow::Result<u64> {
    let stdin = std::io::stdin();
    let mut sequence = 0u64;

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(&line) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Skipping malformed line: {}", e);
                continue;
            }
        };

        sequence += 1;
        let mut event = InterfaceEvent::new(sequence, payload);
        loop {
            match pipeline.try_submit(event) {
                Ok(()) => break,
                Err(rejected) if matches!(rejected.error, PipelineError::QueueFull { .. }) => {
                    event = rejected.into_inner();
                    std::thread::sleep(RESUBMIT_DELAY);
                }
                Err(rejected) => return Err(rejected.into_error().into()),
            }
        }
        log_events(pipeline);
    }

    Ok(sequence)
}

fn log_events(pipeline: &Pipeline<InterfaceEvent>) {
    for event in pipeline.drain_events() {
        match event {
            StageEvent::DeliveryFailed {
                stage,
                attempts,
                error,
            } => tracing::error!(
                "Stage '{}' dropped an event after {} attempt(s): {}",
                stage,
                attempts,
                error
            ),
            StageEvent::Evicted { stage, count } => {
                tracing::warn!("Stage '{}' evicted {} event(s)", stage, count)
            }
            other => tracing::debug!("{:?}", other),
        }
    }
}
