use serde::Serialize;
use tracing::{debug, warn};

use crate::containers::RenameTable;
use crate::ingest::source::{InputSource, Segment};
use crate::ingest::{ParsedRecord, RawEdge, RawVertex, RecordParser};
use crate::metrics::BuildMetrics;
use crate::options::BadRecordPolicy;
use crate::types::{GraphError, Result, VertexToken};

/// Settings shared by every worker of one build.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    /// Lines starting with this byte are skipped.
    pub comment: u8,
    /// What to do with bad records.
    pub bad_records: BadRecordPolicy,
    /// Counter sink for the build.
    pub metrics: &'a dyn BuildMetrics,
}

/// Line counters kept by one worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Lines read from the worker's segments.
    pub lines: u64,
    /// Comment and blank lines.
    pub ignored: u64,
    /// Lines the parser classified as [`ParsedRecord::Skip`].
    pub skipped: u64,
    /// Bad lines dropped under [`BadRecordPolicy::Skip`].
    pub rejected: u64,
    /// Vertex records buffered.
    pub vertices: u64,
    /// Edge records buffered, inverses included.
    pub edges: u64,
}

impl WorkerStats {
    fn add(&mut self, other: &WorkerStats) {
        self.lines += other.lines;
        self.ignored += other.ignored;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.vertices += other.vertices;
        self.edges += other.edges;
    }
}

/// Private buffers of one ingest worker.
///
/// Edges are grouped by source token: the rename table maps a source to the
/// index of its group, and each group keeps insertion order.
pub struct IngestWorker<VP, EP> {
    id: usize,
    vertices: Vec<RawVertex<VP>>,
    groups: Vec<Vec<RawEdge<EP>>>,
    group_of: RenameTable<VertexToken, usize>,
    stats: WorkerStats,
}

impl<VP, EP> IngestWorker<VP, EP> {
    /// Creates an empty worker whose token table grows at `max_load`.
    pub fn new(id: usize, max_load: f32) -> Self {
        Self {
            id,
            vertices: Vec::new(),
            groups: Vec::new(),
            group_of: RenameTable::new().max_load_factor(max_load),
            stats: WorkerStats::default(),
        }
    }

    /// Global worker index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Counters so far.
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Vertex records in read order.
    pub fn vertices(&self) -> &[RawVertex<VP>] {
        &self.vertices
    }

    /// Edge groups in first-seen source order.
    pub fn edge_groups(&self) -> &[Vec<RawEdge<EP>>] {
        &self.groups
    }

    /// Edges buffered so far, inverses included.
    pub fn num_edges(&self) -> u64 {
        self.stats.edges
    }

    /// Table from source token to group index.
    pub fn rename_table(&self) -> &RenameTable<VertexToken, usize> {
        &self.group_of
    }

    /// Buffers a vertex record.
    pub fn push_vertex(&mut self, vertex: RawVertex<VP>) {
        self.vertices.push(vertex);
        self.stats.vertices += 1;
    }

    /// Appends `edge` to its source's group, opening a group on first sight.
    pub fn push_edge(&mut self, edge: RawEdge<EP>) -> Result<()> {
        match self.group_of.get_copied(&edge.src) {
            Some(group) => self.groups[group].push(edge),
            None => {
                let group = self.groups.len();
                self.group_of.put(edge.src, group)?;
                self.groups.push(vec![edge]);
            }
        }
        self.stats.edges += 1;
        Ok(())
    }

    /// Splits the worker into vertices, edge groups and the group table.
    pub fn into_parts(
        self,
    ) -> (
        Vec<RawVertex<VP>>,
        Vec<Vec<RawEdge<EP>>>,
        RenameTable<VertexToken, usize>,
    ) {
        (self.vertices, self.groups, self.group_of)
    }

    /// Classifies and buffers one line.
    ///
    /// Errors are returned untagged; [`IngestWorker::ingest_segment`] attaches the position.
    pub fn ingest_line<P>(&mut self, parser: &P, line: &[u8], comment: u8) -> Result<()>
    where
        P: RecordParser<VertexPayload = VP, EdgePayload = EP>,
    {
        self.stats.lines += 1;
        let body = line.trim_ascii_start();
        if body.is_empty() || body[0] == comment {
            self.stats.ignored += 1;
            return Ok(());
        }
        let text = std::str::from_utf8(line)
            .map_err(|_| GraphError::MalformedRecord("line is not valid UTF-8".into()))?;
        match parser.parse_line(text)? {
            ParsedRecord::Skip => self.stats.skipped += 1,
            ParsedRecord::Vertex(vertex) => self.push_vertex(vertex),
            ParsedRecord::Edges(edges) => {
                for edge in edges {
                    self.push_edge(edge)?;
                }
            }
        }
        Ok(())
    }

    /// Reads every line starting in `segment` of `source`.
    pub fn ingest_segment<P>(
        &mut self,
        parser: &P,
        source: &InputSource,
        segment: Segment,
        ctx: IngestContext<'_>,
    ) -> Result<()>
    where
        P: RecordParser<VertexPayload = VP, EdgePayload = EP>,
    {
        let before = self.stats;
        let name = source.name();
        let outcome = source.for_each_line(segment, |offset, line| {
            match self.ingest_line(parser, line, ctx.comment) {
                Ok(()) => Ok(()),
                Err(err) if err.is_record_level() => match ctx.bad_records {
                    BadRecordPolicy::Skip => {
                        warn!(worker = self.id, source = %name, offset, error = %err, "ingest.record.skipped");
                        ctx.metrics.record_rejected();
                        self.stats.rejected += 1;
                        Ok(())
                    }
                    BadRecordPolicy::Abort => Err(err.at_offset(&name, offset)),
                },
                Err(err) => Err(err),
            }
        });
        self.flush_metrics(&before, ctx.metrics);
        debug!(
            worker = self.id,
            source = %name,
            start = segment.start,
            end = segment.end,
            lines = self.stats.lines - before.lines,
            "ingest.segment.done"
        );
        outcome
    }

    fn flush_metrics(&self, before: &WorkerStats, metrics: &dyn BuildMetrics) {
        let lines = self.stats.lines - before.lines;
        let ignored = self.stats.ignored - before.ignored;
        let dropped = (self.stats.skipped - before.skipped) + (self.stats.rejected - before.rejected);
        metrics.lines_parsed(lines - ignored);
        metrics.lines_skipped(ignored + dropped);
        metrics.vertices_ingested(self.stats.vertices - before.vertices);
        metrics.edges_ingested(self.stats.edges - before.edges);
    }
}

/// Sums worker counters.
pub(crate) fn total_stats<'a>(stats: impl IntoIterator<Item = &'a WorkerStats>) -> WorkerStats {
    let mut total = WorkerStats::default();
    for s in stats {
        total.add(s);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::EdgeListParser;
    use crate::ingest::source::segment_bounds;
    use crate::metrics::CounterMetrics;

    fn ctx(metrics: &CounterMetrics, policy: BadRecordPolicy) -> IngestContext<'_> {
        IngestContext {
            comment: b'#',
            bad_records: policy,
            metrics,
        }
    }

    #[test]
    fn edges_are_grouped_by_source_in_arrival_order() -> Result<()> {
        let mut worker = IngestWorker::<(), ()>::new(0, 0.8);
        for (s, d) in [(1u64, 2u64), (3, 4), (1, 5), (3, 6), (1, 7)] {
            worker.push_edge(RawEdge::new(s, d, None))?;
        }
        let groups: Vec<Vec<(u64, u64)>> = worker
            .edge_groups()
            .iter()
            .map(|g| g.iter().map(|e| (e.src.0, e.dst.0)).collect())
            .collect();
        assert_eq!(groups, vec![vec![(1, 2), (1, 5), (1, 7)], vec![(3, 4), (3, 6)]]);
        assert_eq!(worker.rename_table().get_copied(&VertexToken(3)), Some(1));
        assert_eq!(worker.num_edges(), 5);
        Ok(())
    }

    #[test]
    fn comments_and_blanks_never_reach_the_parser() -> Result<()> {
        let metrics = CounterMetrics::default();
        let source = InputSource::memory("mem", "# header\n\n   \n0 1\n  # indented\n1 2\n9 9\n");
        let parser = EdgeListParser::new(3);
        let mut worker = IngestWorker::new(0, 0.8);
        let len = source.len()?;
        worker.ingest_segment(&parser, &source, segment_bounds(len, 1, 0), ctx(&metrics, BadRecordPolicy::Abort))?;
        let stats = worker.stats();
        assert_eq!(stats.lines, 7);
        assert_eq!(stats.ignored, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.edges, 2);
        let snap = metrics.snapshot();
        assert_eq!(snap.lines_parsed, 3);
        assert_eq!(snap.lines_skipped, 5);
        assert_eq!(snap.edges_ingested, 2);
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_a_record_error() -> Result<()> {
        let metrics = CounterMetrics::default();
        let source = InputSource::memory("bytes", vec![b'1', b' ', 0xff, b'\n', b'0', b' ', b'1', b'\n']);
        let parser = EdgeListParser::new(2);

        let mut strict = IngestWorker::new(0, 0.8);
        let err = strict
            .ingest_segment(&parser, &source, segment_bounds(8, 1, 0), ctx(&metrics, BadRecordPolicy::Abort))
            .unwrap_err();
        match err {
            GraphError::Line(line) => {
                assert_eq!(line.source_name, "bytes");
                assert_eq!(line.offset, 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut lenient = IngestWorker::new(1, 0.8);
        lenient.ingest_segment(&parser, &source, segment_bounds(8, 1, 0), ctx(&metrics, BadRecordPolicy::Skip))?;
        assert_eq!(lenient.stats().rejected, 1);
        assert_eq!(lenient.stats().edges, 1);
        assert_eq!(metrics.snapshot().records_rejected, 1);
        Ok(())
    }
}
