//! Benchmarks for stage queues and end-to-end forwarding
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use illuminati_pipeline::pipeline::StageQueue;
use illuminati_pipeline::{
    BackpressurePolicy, EventRecord, Pipeline, PipelineResult, RetryPolicy, SinkAction,
    StageConfig,
};
use std::time::Duration;

#[derive(Clone)]
struct Sample {
    seq: u64,
    value: f64,
}

impl EventRecord for Sample {}

/// Sink that only touches each record
struct NullSink;

impl SinkAction<Sample> for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn prepare(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    fn persist(&mut self, record: &Sample) -> PipelineResult<()> {
        black_box(record.seq as f64 + record.value);
        Ok(())
    }
}

fn stage_config(capacity: usize) -> StageConfig {
    StageConfig::with_capacity(capacity)
        .backpressure(BackpressurePolicy::Block)
        .retry(RetryPolicy {
            max_attempts: 1000,
            backoff_ms: 1,
        })
        .idle_poll(Duration::from_millis(1))
}

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");
    group.throughput(Throughput::Elements(1));

    for policy in [BackpressurePolicy::Reject, BackpressurePolicy::DropOldest] {
        let queue = StageQueue::new(1024, policy);
        group.bench_function(format!("{:?}", policy), |b| {
            let mut seq = 0u64;
            b.iter(|| {
                let _ = queue.push(black_box(Sample { seq, value: 1.0 }));
                black_box(queue.pop());
                seq = seq.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_drop_oldest_saturated(c: &mut Criterion) {
    let mut group = c.benchmark_group("drop_oldest_saturated");
    group.throughput(Throughput::Elements(1));

    let queue = StageQueue::new(256, BackpressurePolicy::DropOldest);
    for seq in 0..256 {
        let _ = queue.push(Sample { seq, value: 0.0 });
    }
    group.bench_function("push_evict", |b| {
        let mut seq = 256u64;
        b.iter(|| {
            let _ = black_box(queue.push(Sample { seq, value: 0.0 }));
            seq = seq.wrapping_add(1);
        });
    });

    group.finish();
}

fn bench_pipeline_forwarding(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_forwarding");
    group.sample_size(10);

    for stages in [1usize, 3, 5].iter() {
        let records = 10_000u64;
        group.throughput(Throughput::Elements(records));
        group.bench_with_input(BenchmarkId::new("stages", stages), stages, |b, &stages| {
            b.iter(|| {
                let mut builder = Pipeline::builder();
                for i in 0..stages.saturating_sub(1) {
                    builder = builder.stage(format!("stage-{}", i), stage_config(1024));
                }
                let mut pipeline = builder
                    .sink("sink", stage_config(1024), NullSink)
                    .build()
                    .unwrap();

                for seq in 0..records {
                    pipeline.submit(Sample { seq, value: 0.5 }).unwrap();
                }
                black_box(pipeline.shutdown().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_drop_oldest_saturated,
    bench_pipeline_forwarding
);
criterion_main!(benches);
