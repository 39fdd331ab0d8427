//! # illuminati-pipeline: staged event forwarding to HDFS
//!
//! Interface events flow through a chain of buffered stages and are persisted
//! by a terminal HDFS sink. Every stage owns a bounded queue drained by its own
//! worker thread; the sink only accepts writes after its connection descriptor
//! validated.
//!
//! ## Architecture
//!
//! - **Pipeline**: ordered chain of [`Stage`]s built by a [`PipelineBuilder`]
//! - **Stage**: bounded queue, backpressure policy, retrying drain worker
//! - **Sink**: [`HdfsSink`] gated by [`ConnectionDescriptor::validate`]
//! - **Communication**: crossbeam channels for queues, RPC and stage events
//!
//! ## Configuration
//!
//! Stage settings and the `hdfs.connection.*` properties are read from a TOML
//! file, `illuminati.toml` by default. See [`config::PipelineConfig`].
//!
//! ## Example
//!
//! ```no_run
//! use illuminati_pipeline::{
//!     config::PipelineConfig,
//!     record::InterfaceEvent,
//!     sink::{HdfsSink, LocalFsWriter},
//!     PipelineBuilder,
//! };
//!
//! fn main() -> illuminati_pipeline::PipelineResult<()> {
//!     let config = PipelineConfig::load("illuminati.toml")?;
//!     let sink = HdfsSink::new(
//!         "hdfs",
//!         config.connection_descriptor(),
//!         LocalFsWriter::<InterfaceEvent>::new("hdfs-mirror"),
//!     );
//!
//!     let mut pipeline = PipelineBuilder::from_config(&config, sink).build()?;
//!     pipeline.submit(InterfaceEvent::new(1, serde_json::json!({"path": "/"})))?;
//!     pipeline.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod sink;

// Re-export commonly used types
pub use config::{BackpressurePolicy, PipelineConfig, RetryPolicy, StageConfig};
pub use connection::{Authentication, Authorization, ConnectionDescriptor};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineBuilder, SinkAction, Stage, StageEvent, StageState};
pub use record::{EventRecord, InterfaceEvent};
pub use sink::{HdfsSink, HdfsWriter, LocalFsWriter};
