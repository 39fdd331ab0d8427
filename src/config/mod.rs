//! Configuration module
//!
//! The relay reads a single TOML file describing the stage chain, the sink and
//! the HDFS connection:
//!
//! ```toml
//! [defaults]
//! capacity = 1024
//! backpressure = "reject"
//!
//! [[stages]]
//! name = "ingest"
//!
//! [sink]
//! name = "hdfs"
//! output_dir = "./hdfs-mirror"
//!
//! [hdfs.connection]
//! uri = "namenode1"
//! port = 8020
//! user = "svc-illuminati"
//! home = "/user/illuminati"
//! ```
//!
//! The `[hdfs]` table is flattened into the dotted `hdfs.connection.*`
//! property keys that [`ConnectionDescriptor::from_properties`] consumes, so the
//! same keys work whether they come from a TOML file or any other flat source.

pub mod settings;

pub use settings::*;

use crate::connection::ConnectionDescriptor;
use crate::error::{PipelineError, PipelineResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default config file looked up by the relay
pub const DEFAULT_CONFIG_FILE: &str = "illuminati.toml";

/// Default local directory mirroring the HDFS layout
pub const DEFAULT_OUTPUT_DIR: &str = "hdfs-mirror";

/// One stage entry; unset fields inherit from `[defaults]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub name: String,

    #[serde(default)]
    pub capacity: Option<usize>,

    #[serde(default)]
    pub backpressure: Option<BackpressurePolicy>,

    #[serde(default)]
    pub idle_poll_ms: Option<u64>,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl StageEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Apply this entry's overrides on top of `defaults`
    pub fn resolve(&self, defaults: &StageConfig) -> StageConfig {
        StageConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            backpressure: self.backpressure.unwrap_or(defaults.backpressure),
            idle_poll_ms: self.idle_poll_ms.unwrap_or(defaults.idle_poll_ms),
            retry: self.retry.unwrap_or(defaults.retry),
        }
    }
}

/// Sink stage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkEntry {
    #[serde(flatten)]
    pub stage: StageEntry,

    /// Local root under which the HDFS home path is mirrored
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl Default for SinkEntry {
    fn default() -> Self {
        Self {
            stage: StageEntry::new("hdfs"),
            output_dir: default_output_dir(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Settings every stage starts from
    pub defaults: StageConfig,

    /// Forwarding stages, head first
    pub stages: Vec<StageEntry>,

    /// Terminal stage
    pub sink: SinkEntry,

    /// Raw `[hdfs]` table, flattened on demand
    pub hdfs: toml::Table,
}

impl PipelineConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> PipelineResult<Self> {
        toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse pipeline config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content).with_context(|| format!("Loading {:?}", path))
    }

    /// Load a config file, returning defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load pipeline config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Resolved `(name, config)` pairs for the forwarding stages
    pub fn stage_configs(&self) -> Vec<(String, StageConfig)> {
        self.stages
            .iter()
            .map(|entry| (entry.name.clone(), entry.resolve(&self.defaults)))
            .collect()
    }

    /// Resolved config of the sink stage
    pub fn sink_config(&self) -> StageConfig {
        self.sink.stage.resolve(&self.defaults)
    }

    /// The `[hdfs]` table as flat `hdfs.*` property keys
    pub fn connection_properties(&self) -> HashMap<String, String> {
        let mut props = HashMap::new();
        flatten_table("hdfs", &self.hdfs, &mut props);
        props
    }

    /// Connection descriptor built from the `[hdfs]` table (not yet validated)
    pub fn connection_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::from_properties(&self.connection_properties())
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let full_key = format!("{}.{}", prefix, key);
        match value {
            toml::Value::Table(inner) => flatten_table(&full_key, inner, out),
            toml::Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            other => {
                out.insert(full_key, other.to_string());
            }
        }
    }
}
