//! Distributed graph construction with master/mirror replication.
//!
//! Raw vertex and edge records are read in parallel, vertices are hashed to
//! virtual hosts and virtual hosts are packed onto physical hosts by edge
//! load. Every host ends up with a [`MirrorGraph`] partition holding its
//! masters, the mirrors its edges reach, compressed out-edges and the index
//! tables that [`MirrorGraph::sync`] and [`MirrorGraph::broadcast`] use to
//! move payloads between replicas.

#![warn(missing_docs)]

pub mod containers;
pub mod graph;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod options;
pub mod partition;
pub mod runtime;
pub mod types;

pub use graph::{BuildReport, GraphBuilder, HostPartition, MirrorGraph, SyncMode};
pub use ingest::{EdgeListParser, InputSource, RawEdge, RawVertex, RecordParser, WmdParser};
pub use logging::init_logging;
pub use metrics::{BuildMetrics, CounterMetrics, NoopMetrics};
pub use options::{BadRecordPolicy, BuildOptions, UndeclaredVertexPolicy};
pub use runtime::Runtime;
pub use types::{
    EdgeHandle, GraphError, HostId, Result, TopologyId, VertexRef, VertexToken, VirtualHostId,
};
