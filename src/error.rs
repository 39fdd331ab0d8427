//! Error handling for the pipeline
//!
//! This module defines the error taxonomy shared by stages, the pipeline
//! builder, the connection descriptor and the sink, plus a Result alias.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required connection or stage setting is missing or invalid
    #[error("Configuration error: {field} is required value")]
    Configuration { field: &'static str },

    /// A string could not be mapped onto a closed enumeration
    #[error("Unknown {field} value '{value}'")]
    EnumMapping { field: &'static str, value: String },

    /// An operation was attempted before `init()` completed
    #[error("Stage '{stage}' is not initialized")]
    NotInitialized { stage: String },

    /// The next stage or the sink cannot be reached
    #[error("Downstream of stage '{stage}' unavailable: {reason}")]
    DownstreamUnavailable { stage: String, reason: String },

    /// A sink call exceeded the configured RPC timeout
    #[error("Stage '{stage}' timed out after {timeout_ms} ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// The stage buffer is at capacity and the policy rejects new items
    #[error("Stage '{stage}' queue is full (capacity {capacity})")]
    QueueFull { stage: String, capacity: usize },

    /// The stage is draining or stopped and no longer accepts items
    #[error("Stage '{stage}' is closed")]
    StageClosed { stage: String },

    /// A stage failed to initialize while the pipeline was being built
    #[error("Stage #{index} '{stage}' failed to initialize: {source}")]
    StageInit {
        index: usize,
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// A drain worker thread panicked
    #[error("Worker of stage '{stage}' panicked")]
    WorkerPanicked { stage: String },

    /// Errors related to configuration file loading/parsing
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether a delivery failing with this error may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::DownstreamUnavailable { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::QueueFull { .. } => true,
            PipelineError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The configuration field this error names, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            PipelineError::Configuration { field } | PipelineError::EnumMapping { field, .. } => {
                Some(*field)
            }
            PipelineError::StageInit { source, .. } | PipelineError::WithContext { source, .. } => {
                source.field()
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> PipelineResult<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for PipelineResult<T> {
    fn context(self, context: impl Into<String>) -> PipelineResult<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
