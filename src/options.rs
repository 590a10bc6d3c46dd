//! Build configuration, set in code or read from TOML.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::containers::DEFAULT_MAX_LOAD;
use crate::metrics::BuildMetrics;
use crate::types::{GraphError, Result};

/// Default number of virtual hosts per physical host.
pub const DEFAULT_SCALE_FACTOR: usize = 8;

/// What an ingest worker does with a line it cannot parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadRecordPolicy {
    /// Fail the build with the line-level error.
    #[default]
    Abort,
    /// Log the line, count it and carry on.
    Skip,
}

/// What happens to edge endpoints that no vertex record declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeclaredVertexPolicy {
    /// Create a master for the token on its owning host.
    #[default]
    Materialize,
    /// Fail the build with [`GraphError::UndeclaredVertex`].
    Reject,
}

/// Configuration supplied to [`crate::GraphBuilder`].
#[derive(Clone)]
pub struct BuildOptions {
    /// Number of physical hosts the graph is split across.
    pub num_hosts: usize,
    /// Virtual hosts per physical host.
    pub scale_factor: usize,
    /// Ingest workers driven by each host.
    pub workers_per_host: usize,
    /// Byte segments each worker reads per input file.
    pub segments_per_worker: usize,
    /// First non-blank byte marking a comment line.
    pub comment: u8,
    /// Load factor at which worker rename tables grow.
    pub rename_max_load: f32,
    /// Keep each worker's source-token table after partitioning.
    pub retain_worker_tables: bool,
    /// Handling of unparsable lines.
    pub bad_records: BadRecordPolicy,
    /// Handling of endpoints without a vertex record.
    pub undeclared_vertices: UndeclaredVertexPolicy,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn BuildMetrics>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("num_hosts", &self.num_hosts)
            .field("scale_factor", &self.scale_factor)
            .field("workers_per_host", &self.workers_per_host)
            .field("segments_per_worker", &self.segments_per_worker)
            .field("comment", &(self.comment as char))
            .field("rename_max_load", &self.rename_max_load)
            .field("retain_worker_tables", &self.retain_worker_tables)
            .field("bad_records", &self.bad_records)
            .field("undeclared_vertices", &self.undeclared_vertices)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl BuildOptions {
    /// Creates options for `num_hosts` hosts with default settings.
    pub fn new(num_hosts: usize) -> Self {
        Self {
            num_hosts,
            scale_factor: DEFAULT_SCALE_FACTOR,
            workers_per_host: 2,
            segments_per_worker: 1,
            comment: b'#',
            rename_max_load: DEFAULT_MAX_LOAD,
            retain_worker_tables: false,
            bad_records: BadRecordPolicy::Abort,
            undeclared_vertices: UndeclaredVertexPolicy::Materialize,
            metrics: None,
        }
    }

    /// Sets the number of physical hosts.
    pub fn num_hosts(mut self, hosts: usize) -> Self {
        self.num_hosts = hosts;
        self
    }

    /// Sets the number of virtual hosts per physical host.
    pub fn scale_factor(mut self, factor: usize) -> Self {
        self.scale_factor = factor;
        self
    }

    /// Sets the number of ingest workers per host.
    pub fn workers_per_host(mut self, workers: usize) -> Self {
        self.workers_per_host = workers;
        self
    }

    /// Sets how many striped segments each worker reads per file.
    pub fn segments_per_worker(mut self, segments: usize) -> Self {
        self.segments_per_worker = segments;
        self
    }

    /// Sets the comment marker.
    pub fn comment(mut self, marker: u8) -> Self {
        self.comment = marker;
        self
    }

    /// Sets the rename table growth threshold.
    pub fn rename_max_load(mut self, load: f32) -> Self {
        self.rename_max_load = load;
        self
    }

    /// Keeps per-worker rename tables in the build report.
    pub fn retain_worker_tables(mut self, retain: bool) -> Self {
        self.retain_worker_tables = retain;
        self
    }

    /// Sets the bad record policy.
    pub fn bad_records(mut self, policy: BadRecordPolicy) -> Self {
        self.bad_records = policy;
        self
    }

    /// Sets the undeclared vertex policy.
    pub fn undeclared_vertices(mut self, policy: UndeclaredVertexPolicy) -> Self {
        self.undeclared_vertices = policy;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn BuildMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Total number of virtual hosts.
    pub fn num_virtual_hosts(&self) -> usize {
        self.num_hosts * self.scale_factor
    }

    /// Total number of ingest workers.
    pub fn num_workers(&self) -> usize {
        self.num_hosts * self.workers_per_host
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.num_hosts == 0 {
            return Err(GraphError::Invalid("num_hosts must be at least 1"));
        }
        if self.scale_factor == 0 {
            return Err(GraphError::Invalid("scale_factor must be at least 1"));
        }
        if self.workers_per_host == 0 {
            return Err(GraphError::Invalid("workers_per_host must be at least 1"));
        }
        if self.segments_per_worker == 0 {
            return Err(GraphError::Invalid("segments_per_worker must be at least 1"));
        }
        if self.num_virtual_hosts() > u32::MAX as usize {
            return Err(GraphError::Invalid("too many virtual hosts"));
        }
        if !(self.rename_max_load > 0.0 && self.rename_max_load <= 1.0) {
            return Err(GraphError::Invalid("rename_max_load must be in (0, 1]"));
        }
        if self.comment.is_ascii_whitespace() || !self.comment.is_ascii() {
            return Err(GraphError::Invalid("comment marker must be a visible ASCII byte"));
        }
        Ok(())
    }

    /// Parses options from TOML, starting from defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::default().apply_toml(text)
    }

    /// Reads options from a TOML file, starting from defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlays the keys present in `text` onto these options.
    pub fn apply_toml(mut self, text: &str) -> Result<Self> {
        let file: OptionsFile = toml::from_str(text)?;
        if let Some(v) = file.num_hosts {
            self.num_hosts = v;
        }
        if let Some(v) = file.scale_factor {
            self.scale_factor = v;
        }
        if let Some(v) = file.workers_per_host {
            self.workers_per_host = v;
        }
        if let Some(v) = file.segments_per_worker {
            self.segments_per_worker = v;
        }
        if let Some(marker) = file.comment {
            self.comment = match marker.as_bytes() {
                [byte] => *byte,
                _ => return Err(GraphError::Invalid("comment must be a single byte")),
            };
        }
        if let Some(v) = file.rename_max_load {
            self.rename_max_load = v;
        }
        if let Some(v) = file.retain_worker_tables {
            self.retain_worker_tables = v;
        }
        if let Some(v) = file.bad_records {
            self.bad_records = v;
        }
        if let Some(v) = file.undeclared_vertices {
            self.undeclared_vertices = v;
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    num_hosts: Option<usize>,
    scale_factor: Option<usize>,
    workers_per_host: Option<usize>,
    segments_per_worker: Option<usize>,
    comment: Option<String>,
    rename_max_load: Option<f32>,
    retain_worker_tables: Option<bool>,
    bad_records: Option<BadRecordPolicy>,
    undeclared_vertices: Option<UndeclaredVertexPolicy>,
}
