//! Validated, timeout-bounded persistence.
//!
//! After `prepare()` the writer lives on its own RPC thread. Each `persist()`
//! sends one sequence-numbered request and waits at most the descriptor's RPC
//! timeout for the matching reply, so a hung store can never wedge the drain
//! worker (and with it the shutdown cascade). Replies to calls that already
//! timed out are recognised by their sequence number and discarded.

use crate::connection::ConnectionDescriptor;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::SinkAction;
use crate::record::EventRecord;
use crate::sink::HdfsWriter;
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use std::marker::PhantomData;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum Request<T> {
    Write { seq: u64, record: T },
    Close { seq: u64 },
}

struct Reply {
    seq: u64,
    result: PipelineResult<()>,
}

struct RpcHandle<T> {
    requests: Sender<Request<T>>,
    replies: Receiver<Reply>,
    thread: Option<JoinHandle<()>>,
}

/// Terminal sink writing through an [`HdfsWriter`] once the descriptor validated.
pub struct HdfsSink<T: EventRecord, W: HdfsWriter<T>> {
    name: String,
    descriptor: ConnectionDescriptor,
    writer: Option<W>,
    rpc: Option<RpcHandle<T>>,
    next_seq: u64,
    _record: PhantomData<fn(T)>,
}

impl<T: EventRecord, W: HdfsWriter<T>> HdfsSink<T, W> {
    pub fn new(name: impl Into<String>, descriptor: ConnectionDescriptor, writer: W) -> Self {
        Self {
            name: name.into(),
            descriptor,
            writer: Some(writer),
            rpc: None,
            next_seq: 0,
            _record: PhantomData,
        }
    }

    /// The descriptor this sink connects with.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Whether `prepare()` succeeded and the sink accepts writes.
    pub fn is_connected(&self) -> bool {
        self.rpc.is_some()
    }

    fn timeout_error(&self, timeout: Duration) -> PipelineError {
        PipelineError::Timeout {
            stage: self.name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn unavailable(&self) -> PipelineError {
        PipelineError::DownstreamUnavailable {
            stage: self.name.clone(),
            reason: format!("HDFS writer for {} has stopped", self.descriptor.uri()),
        }
    }

    /// Send one request and wait for its reply until the RPC deadline.
    fn call(&mut self, request: impl FnOnce(u64) -> Request<T>) -> PipelineResult<()> {
        let timeout = self.descriptor.rpc_timeout();
        let Some(rpc) = self.rpc.as_ref() else {
            return Err(PipelineError::NotInitialized {
                stage: self.name.clone(),
            });
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let deadline = Instant::now() + timeout;

        match rpc.requests.send_deadline(request(seq), deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Err(self.timeout_error(timeout)),
            Err(SendTimeoutError::Disconnected(_)) => return Err(self.unavailable()),
        }

        loop {
            match rpc.replies.recv_deadline(deadline) {
                Ok(reply) if reply.seq == seq => return reply.result,
                Ok(reply) => {
                    tracing::debug!("Sink '{}' discarding late reply #{}", self.name, reply.seq);
                }
                Err(RecvTimeoutError::Timeout) => return Err(self.timeout_error(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(self.unavailable()),
            }
        }
    }
}

impl<T: EventRecord, W: HdfsWriter<T>> SinkAction<T> for HdfsSink<T, W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self) -> PipelineResult<()> {
        if self.rpc.is_some() {
            return Ok(());
        }
        self.descriptor.validate()?;

        let Some(mut writer) = self.writer.take() else {
            return Err(PipelineError::DownstreamUnavailable {
                stage: self.name.clone(),
                reason: "writer was already released".to_string(),
            });
        };
        if let Err(e) = writer.connect(&self.descriptor) {
            self.writer = Some(writer);
            return Err(e);
        }

        let (req_tx, req_rx) = bounded(1);
        let (reply_tx, reply_rx) = unbounded();
        let thread = std::thread::Builder::new()
            .name(format!("hdfs-rpc-{}", self.name))
            .spawn(move || serve(writer, req_rx, reply_tx))?;

        tracing::info!(
            "Sink '{}' connected to {} as '{}' (home {})",
            self.name,
            self.descriptor.uri(),
            self.descriptor.user(),
            self.descriptor.home_path()
        );
        self.rpc = Some(RpcHandle {
            requests: req_tx,
            replies: reply_rx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn persist(&mut self, record: &T) -> PipelineResult<()> {
        let record = record.clone();
        self.call(move |seq| Request::Write { seq, record })
    }

    fn close(&mut self) -> PipelineResult<()> {
        if self.rpc.is_none() {
            return Ok(());
        }
        let result = self.call(|seq| Request::Close { seq });

        if let Some(mut rpc) = self.rpc.take() {
            match &result {
                Err(PipelineError::Timeout { .. }) => {
                    tracing::warn!("Sink '{}' writer did not close in time, detaching", self.name);
                }
                _ => {
                    if let Some(thread) = rpc.thread.take() {
                        if thread.join().is_err() {
                            tracing::error!("Sink '{}' RPC thread panicked", self.name);
                        }
                    }
                }
            }
        }
        tracing::info!("Sink '{}' closed", self.name);
        result
    }
}

/// RPC thread body. Owns the writer until `Close` or until the sink goes away.
fn serve<T: EventRecord, W: HdfsWriter<T>>(
    mut writer: W,
    requests: Receiver<Request<T>>,
    replies: Sender<Reply>,
) {
    for request in requests {
        match request {
            Request::Write { seq, record } => {
                let result = writer.write(&record);
                if replies.send(Reply { seq, result }).is_err() {
                    break;
                }
            }
            Request::Close { seq } => {
                let result = writer.close();
                let _ = replies.send(Reply { seq, result });
                return;
            }
        }
    }

    // Sink dropped without an explicit close
    if let Err(e) = writer.close() {
        tracing::warn!("HDFS writer failed to close: {}", e);
    }
}
