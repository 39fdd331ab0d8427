//! HDFS persistence for the terminal stage.
//!
//! [`HdfsSink`] is the [`SinkAction`](crate::pipeline::SinkAction) of the last
//! stage. It holds the [`ConnectionDescriptor`] and an [`HdfsWriter`], the seam
//! to whatever client actually talks to the store. The writer is only reached
//! after the descriptor validated and the connection was opened.
//!
//! [`LocalFsWriter`] mirrors the HDFS directory layout on the local disk.

pub mod hdfs;
pub mod local;

pub use hdfs::HdfsSink;
pub use local::LocalFsWriter;

use crate::connection::ConnectionDescriptor;
use crate::error::PipelineResult;
use crate::record::EventRecord;

/// Storage write API used by [`HdfsSink`].
///
/// Calls arrive in order: one `connect` on the thread initialising the stage,
/// then any number of `write`s and a final `close` on the sink's RPC thread.
pub trait HdfsWriter<T: EventRecord>: Send + 'static {
    /// Open the connection described by a validated descriptor.
    fn connect(&mut self, descriptor: &ConnectionDescriptor) -> PipelineResult<()>;

    /// Persist one record.
    fn write(&mut self, record: &T) -> PipelineResult<()>;

    /// Flush and release the connection.
    fn close(&mut self) -> PipelineResult<()>;
}
