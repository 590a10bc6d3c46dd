//! Counters reported while building and synchronising.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking construction and synchronisation counters.
///
/// An implementation is threaded through [`crate::BuildOptions`] instead of
/// living in process-wide statics, so concurrent builds in one process keep
/// separate numbers. All methods are called from worker threads.
pub trait BuildMetrics: Send + Sync {
    /// Records `count` input lines handed to a parser.
    fn lines_parsed(&self, count: u64);

    /// Records `count` lines dropped without producing a record (comments,
    /// blanks, out-of-domain edges, tolerated bad records).
    fn lines_skipped(&self, count: u64);

    /// Records a line that failed to parse.
    fn record_rejected(&self);

    /// Records vertex records read by ingest workers.
    fn vertices_ingested(&self, count: u64);

    /// Records edge records (including synthesized inverses) read by ingest workers.
    fn edges_ingested(&self, count: u64);

    /// Records mirror vertices created on one host.
    fn mirrors_created(&self, count: u64);

    /// Records merge invocations executed by `sync`, `reduce` or `broadcast`.
    fn merges_applied(&self, count: u64);
}

/// A no-op implementation of [`BuildMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl BuildMetrics for NoopMetrics {
    fn lines_parsed(&self, _count: u64) {}
    fn lines_skipped(&self, _count: u64) {}
    fn record_rejected(&self) {}
    fn vertices_ingested(&self, _count: u64) {}
    fn edges_ingested(&self, _count: u64) {}
    fn mirrors_created(&self, _count: u64) {}
    fn merges_applied(&self, _count: u64) {}
}

/// Thread-safe counter-based implementation of [`BuildMetrics`].
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Lines handed to a parser.
    pub lines_parsed: AtomicU64,
    /// Lines that produced no record.
    pub lines_skipped: AtomicU64,
    /// Lines that failed to parse.
    pub records_rejected: AtomicU64,
    /// Vertex records read.
    pub vertices_ingested: AtomicU64,
    /// Edge records read.
    pub edges_ingested: AtomicU64,
    /// Mirrors created across all hosts.
    pub mirrors_created: AtomicU64,
    /// Merge invocations executed.
    pub merges_applied: AtomicU64,
}

impl CounterMetrics {
    /// Plain-value copy of every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lines_parsed: self.lines_parsed.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            vertices_ingested: self.vertices_ingested.load(Ordering::Relaxed),
            edges_ingested: self.edges_ingested.load(Ordering::Relaxed),
            mirrors_created: self.mirrors_created.load(Ordering::Relaxed),
            merges_applied: self.merges_applied.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter, e.g. between two builds sharing one collector.
    pub fn reset(&self) {
        for counter in [
            &self.lines_parsed,
            &self.lines_skipped,
            &self.records_rejected,
            &self.vertices_ingested,
            &self.edges_ingested,
            &self.mirrors_created,
            &self.merges_applied,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Values read from a [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    /// Lines handed to the parser.
    pub lines_parsed: u64,
    /// Lines the parser skipped.
    pub lines_skipped: u64,
    /// Bad records dropped.
    pub records_rejected: u64,
    /// Vertex records buffered.
    pub vertices_ingested: u64,
    /// Edge records buffered.
    pub edges_ingested: u64,
    /// Mirror slots created.
    pub mirrors_created: u64,
    /// Mirror/master merges and broadcasts applied.
    pub merges_applied: u64,
}

impl BuildMetrics for CounterMetrics {
    fn lines_parsed(&self, count: u64) {
        self.lines_parsed.fetch_add(count, Ordering::Relaxed);
    }

    fn lines_skipped(&self, count: u64) {
        self.lines_skipped.fetch_add(count, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn vertices_ingested(&self, count: u64) {
        self.vertices_ingested.fetch_add(count, Ordering::Relaxed);
    }

    fn edges_ingested(&self, count: u64) {
        self.edges_ingested.fetch_add(count, Ordering::Relaxed);
    }

    fn mirrors_created(&self, count: u64) {
        self.mirrors_created.fetch_add(count, Ordering::Relaxed);
    }

    fn merges_applied(&self, count: u64) {
        self.merges_applied.fetch_add(count, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, a shared [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn BuildMetrics> {
    Arc::new(NoopMetrics)
}
