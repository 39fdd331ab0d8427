//! Event record capability.
//!
//! Stages never look inside a record. The only requirement on a record type is
//! the [`EventRecord`] marker, so a pipeline is homogeneous over one record type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker for types that can travel through a pipeline.
///
/// Records cross worker threads and are re-sent when a delivery is retried,
/// hence `Clone + Send + 'static`.
pub trait EventRecord: Clone + Send + 'static {}

/// Opaque event envelope produced by the relay binary.
///
/// The payload is carried as-is; its schema belongs to the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEvent {
    /// Monotonic sequence number assigned by the producer.
    pub sequence: u64,
    /// Time the event entered the pipeline.
    pub received_at: DateTime<Utc>,
    /// Opaque payload.
    pub payload: serde_json::Value,
}

impl InterfaceEvent {
    pub fn new(sequence: u64, payload: serde_json::Value) -> Self {
        Self {
            sequence,
            received_at: Utc::now(),
            payload,
        }
    }
}

impl EventRecord for InterfaceEvent {}
