//! Terminal action of a sink stage.

use crate::error::PipelineResult;
use crate::record::EventRecord;

/// What a terminal stage does with each drained record.
///
/// The owning stage calls `prepare` from `init()`, `persist` once per drained
/// record (again on retry), and `close` after its buffer is flushed at
/// shutdown.
pub trait SinkAction<T: EventRecord>: Send + 'static {
    /// Human-readable name of this sink.
    fn name(&self) -> &str;

    /// Validate configuration and acquire resources. The stage refuses to
    /// initialise if this fails.
    fn prepare(&mut self) -> PipelineResult<()>;

    /// Persist one record.
    fn persist(&mut self, record: &T) -> PipelineResult<()>;

    /// Flush and release resources.
    fn close(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
