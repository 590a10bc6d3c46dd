//! Parallel ingestion of raw vertex and edge records.
//!
//! Input files are cut into byte-striped segments (see [`source`]), each
//! worker parses its segments line by line through a [`RecordParser`] and
//! buffers the result in an [`IngestWorker`]. Nothing is shared between
//! workers until the load accounting phase.

use smallvec::SmallVec;

use crate::types::{Result, VertexToken};

mod edge_list;
pub mod source;
mod wmd;
mod worker;

pub use edge_list::EdgeListParser;
pub use source::InputSource;
pub use wmd::{WmdEdge, WmdEdgeKind, WmdParser, WmdVertexKind, WMD_FIELD_COUNT};
pub(crate) use worker::total_stats;
pub use worker::{IngestContext, IngestWorker, WorkerStats};

/// A vertex record as read from input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawVertex<P> {
    /// Token named by the record.
    pub token: VertexToken,
    /// Payload, if the format carries one.
    pub payload: Option<P>,
}

/// An edge record as read from input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEdge<P> {
    /// Source token.
    pub src: VertexToken,
    /// Destination token.
    pub dst: VertexToken,
    /// Payload, if the format carries one.
    pub payload: Option<P>,
}

impl<P> RawVertex<P> {
    /// Builds a vertex record.
    pub fn new(token: impl Into<VertexToken>, payload: Option<P>) -> Self {
        Self {
            token: token.into(),
            payload,
        }
    }
}

impl<P> RawEdge<P> {
    /// Builds an edge record.
    pub fn new(src: impl Into<VertexToken>, dst: impl Into<VertexToken>, payload: Option<P>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            payload,
        }
    }
}

/// Edges produced by one line; two when the format defines an inverse.
pub type EdgeBatch<P> = SmallVec<[RawEdge<P>; 2]>;

/// Classification of one input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedRecord<VP, EP> {
    /// Nothing to insert (out-of-range ids, unparsable numbers in lenient formats).
    Skip,
    /// One vertex declaration.
    Vertex(RawVertex<VP>),
    /// One edge, or an edge followed by its inverse.
    Edges(EdgeBatch<EP>),
}

/// Turns one line of text into a record.
///
/// Implementations must be pure per line: workers call them concurrently on
/// disjoint lines. Comment and blank lines never reach the parser.
pub trait RecordParser: Sync {
    /// Payload attached to vertex records.
    type VertexPayload: Send;
    /// Payload attached to edge records.
    type EdgePayload: Send;

    /// Parses a line with its line terminator removed.
    fn parse_line(
        &self,
        line: &str,
    ) -> Result<ParsedRecord<Self::VertexPayload, Self::EdgePayload>>;

    /// For formats without vertex records: every token in `[0, n)` is a vertex.
    fn vertex_domain(&self) -> Option<u64> {
        None
    }
}
