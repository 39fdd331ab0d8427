//! Staged, queue-buffered forwarding pipeline.
//!
//! Records enter at the head stage and travel stage to stage until the
//! terminal stage hands them to a [`SinkAction`]. Every stage buffers in a
//! bounded queue and is drained by its own worker thread, so a slow sink
//! never blocks producers beyond the configured backpressure policy.
//!
//! # Architecture
//!
//! ```text
//! producers ──► [ingest] ──► [buffer] ──► [hdfs sink] ──► HdfsWriter
//!                  │            │              │
//!                  └────────────┴──────────────┴──► StageEvent channel
//! ```
//!
//! # Design
//!
//! - **One consumer per queue**: only the stage's drain worker dequeues.
//! - **Bounded buffers**: Reject, DropOldest or Block when full.
//! - **Cascading shutdown**: a stage drains fully before telling the next one.
//! - **Failures are events**: exhausted deliveries are published, never lost silently.

pub mod event;
pub mod executor;
pub mod queue;
pub mod sink;
pub mod stage;
pub(crate) mod worker;

pub use event::{StageEvent, StageStats, StageStatsSnapshot, EVENT_CHANNEL_CAPACITY};
pub use executor::{Pipeline, PipelineBuilder};
pub use queue::{Pushed, Rejected, StageQueue};
pub use sink::SinkAction;
pub use stage::{Stage, StageLink, StageState};
