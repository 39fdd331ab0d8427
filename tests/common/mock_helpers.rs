//! In-memory writers standing in for the HDFS client

use illuminati_pipeline::{
    ConnectionDescriptor, EventRecord, HdfsWriter, PipelineError, PipelineResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared view of everything a [`MemoryWriter`] received
#[derive(Clone)]
pub struct Recorded<T> {
    pub records: Arc<Mutex<Vec<T>>>,
    pub connected_to: Arc<Mutex<Option<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl<T: Clone> Recorded<T> {
    pub fn records(&self) -> Vec<T> {
        self.records.lock().unwrap().clone()
    }

    pub fn connected_to(&self) -> Option<String> {
        self.connected_to.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Writer that keeps records in memory, optionally slowing every write
pub struct MemoryWriter<T> {
    recorded: Recorded<T>,
    write_delay: Option<Duration>,
}

impl<T: Clone> MemoryWriter<T> {
    pub fn new() -> (Self, Recorded<T>) {
        let recorded = Recorded {
            records: Arc::new(Mutex::new(Vec::new())),
            connected_to: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let writer = Self {
            recorded: recorded.clone(),
            write_delay: None,
        };
        (writer, recorded)
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }
}

impl<T: EventRecord> HdfsWriter<T> for MemoryWriter<T> {
    fn connect(&mut self, descriptor: &ConnectionDescriptor) -> PipelineResult<()> {
        *self.recorded.connected_to.lock().unwrap() = Some(descriptor.uri());
        Ok(())
    }

    fn write(&mut self, record: &T) -> PipelineResult<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        self.recorded.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        if self.recorded.closed.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Config("writer closed twice".to_string()));
        }
        Ok(())
    }
}
