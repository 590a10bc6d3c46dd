//! The construction pipeline.
//!
//! Phases run in order with a barrier between each: ingest, load
//! accounting, host assignment, scatter, remote endpoint resolution, mirror
//! resolution with compaction, and finally the master/mirror exchange.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::containers::{DirtyBitset, RenameTable};
use crate::graph::csr::gather;
use crate::graph::mirror::{invert_for_host, resolve_mirrors};
use crate::graph::{HostPartition, MirrorGraph, MirrorToMaster};
use crate::ingest::source::worker_segments;
use crate::ingest::{
    total_stats, IngestContext, IngestWorker, InputSource, RawEdge, RecordParser, WorkerStats,
};
use crate::metrics::{default_metrics, BuildMetrics};
use crate::options::BuildOptions;
use crate::partition::{
    assign_hosts, remote_references, scatter_host, DraftDst, HostDraft, LoadAccountant,
    ScatterInput,
};
use crate::runtime::{do_all, Runtime};
use crate::types::{GraphError, Result, TopologyId, VertexToken};

/// Wall-clock time spent per phase, in milliseconds.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PhaseTimings {
    /// Parsing every input.
    pub ingest_ms: f64,
    /// Load accounting and host assignment.
    pub assign_ms: f64,
    /// Scatter to hosts and endpoint materialization.
    pub partition_ms: f64,
    /// Mirror resolution, compaction and the table exchange.
    pub mirror_ms: f64,
    /// The whole build.
    pub total_ms: f64,
}

/// Per-host counts after construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HostReport {
    /// Physical host id.
    pub host: u32,
    /// Local masters.
    pub masters: u64,
    /// Local mirrors.
    pub mirrors: u64,
    /// Stored out-edges.
    pub edges: u64,
    /// Masters created for endpoints without a vertex record.
    pub implicit_vertices: u64,
    /// Edge load the host assignment charged to this host.
    pub assigned_edges: u64,
}

/// What happened during one build.
#[derive(Debug, Serialize)]
pub struct BuildReport {
    /// Physical hosts.
    pub num_hosts: usize,
    /// Virtual hosts used for load balancing.
    pub num_virtual_hosts: usize,
    /// Physical host of each virtual host.
    pub virtual_to_physical: Vec<u32>,
    /// One entry per physical host.
    pub hosts: Vec<HostReport>,
    /// Counters summed over every ingest worker.
    pub ingest: WorkerStats,
    /// Wall-clock time per phase.
    pub timings: PhaseTimings,
    /// Per-worker source-token tables, kept only when requested.
    #[serde(skip)]
    pub worker_tables: Option<Vec<RenameTable<VertexToken, usize>>>,
}

impl BuildReport {
    /// Masters across all hosts, one per distinct token.
    pub fn total_masters(&self) -> u64 {
        self.hosts.iter().map(|h| h.masters).sum()
    }

    /// Mirrors across all hosts.
    pub fn total_mirrors(&self) -> u64 {
        self.hosts.iter().map(|h| h.mirrors).sum()
    }

    /// Stored edges across all hosts.
    pub fn total_edges(&self) -> u64 {
        self.hosts.iter().map(|h| h.edges).sum()
    }
}

/// Builds a [`MirrorGraph`] from one or more inputs.
#[derive(Debug)]
pub struct GraphBuilder {
    options: BuildOptions,
    inputs: Vec<InputSource>,
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

impl GraphBuilder {
    /// Starts a build with no inputs.
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            inputs: Vec::new(),
        }
    }

    /// Options the build runs with.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Adds an input read after those already added.
    pub fn input(mut self, source: InputSource) -> Self {
        self.inputs.push(source);
        self
    }

    /// Adds several inputs, read in iteration order.
    pub fn inputs(mut self, sources: impl IntoIterator<Item = InputSource>) -> Self {
        self.inputs.extend(sources);
        self
    }

    /// Runs the whole pipeline.
    ///
    /// `vertex_init` creates the payload of every slot: declared vertices get
    /// their parsed payload, mirrors and implicit vertices get `None`.
    /// `edge_init` creates the payload stored with each kept edge.
    pub fn build<P, V, E, FV, FE>(
        self,
        parser: &P,
        vertex_init: FV,
        edge_init: FE,
    ) -> Result<MirrorGraph<V, E>>
    where
        P: RecordParser,
        P::VertexPayload: Sync,
        P::EdgePayload: Sync,
        V: Send + Sync,
        E: Send + Sync,
        FV: Fn(VertexToken, Option<&P::VertexPayload>) -> V + Sync,
        FE: Fn(&RawEdge<P::EdgePayload>) -> E + Sync,
    {
        let options = self.options;
        options.validate()?;
        let runtime = Runtime::new(options.num_hosts, options.workers_per_host)?;
        let metrics: Arc<dyn BuildMetrics> = options.metrics.clone().unwrap_or_else(default_metrics);
        let started = Instant::now();
        let mut timings = PhaseTimings::default();
        info!(
            hosts = options.num_hosts,
            virtual_hosts = options.num_virtual_hosts(),
            workers = runtime.num_workers(),
            inputs = self.inputs.len(),
            "build.start"
        );

        let phase = Instant::now();
        let workers = ingest(&runtime, &options, &self.inputs, parser, metrics.as_ref())?;
        let ingested = total_stats(workers.iter().map(|w| w.stats()).collect::<Vec<_>>().iter());
        timings.ingest_ms = elapsed_ms(phase);
        info!(
            lines = ingested.lines,
            vertices = ingested.vertices,
            edges = ingested.edges,
            rejected = ingested.rejected,
            "build.ingest.complete"
        );

        let phase = Instant::now();
        let accountant = LoadAccountant::new(options.num_virtual_hosts());
        do_all("load", workers.iter(), |worker| {
            accountant.account_groups(worker.edge_groups());
            Ok(())
        })?;
        let placement = assign_hosts(&accountant.loads(), options.num_hosts)?;
        timings.assign_ms = elapsed_ms(phase);
        info!(
            edges = accountant.total(),
            host_edges = ?placement.host_edge_counts(),
            "build.assign.complete"
        );

        let phase = Instant::now();
        let implicit = |token: VertexToken| vertex_init(token, None);
        let mut drafts: Vec<HostDraft<V, E>> = {
            let input = ScatterInput {
                placement: &placement,
                workers: &workers,
                vertex_domain: parser.vertex_domain(),
                undeclared: options.undeclared_vertices,
                max_load: options.rename_max_load,
            };
            runtime.on_each_host("scatter", |host| {
                scatter_host(host, &input, &vertex_init, &edge_init)
            })?
        };
        let worker_tables = if options.retain_worker_tables {
            Some(workers.into_iter().map(|w| w.into_parts().2).collect())
        } else {
            drop(workers);
            None
        };

        let remote = runtime.on_each_host("remote", |host| {
            Ok(remote_references(host, &drafts, &placement))
        })?;
        let policy = options.undeclared_vertices;
        do_all("materialize", drafts.iter_mut().zip(remote), |(draft, tokens)| {
            draft.materialize_remote(&tokens, policy, &implicit)
        })?;
        timings.partition_ms = elapsed_ms(phase);
        let implicit_counts: Vec<u64> = drafts.iter().map(|d| d.implicit).collect();
        info!(
            masters = drafts.iter().map(HostDraft::num_masters).sum::<u64>(),
            implicit = implicit_counts.iter().sum::<u64>(),
            "build.partition.complete"
        );

        let phase = Instant::now();
        let mirror_tables = runtime.on_each_host("mirrors", |host| {
            resolve_mirrors(&drafts[host.index()], &drafts, &placement)
        })?;
        let max_load = options.rename_max_load;
        let mut hosts = do_all("compact", drafts.into_iter().zip(mirror_tables), |(draft, table)| {
            compact(draft, table, max_load, &implicit, metrics.as_ref())
        })?;
        let inverse = {
            let tables: Vec<&[MirrorToMaster]> =
                hosts.iter().map(|h| h.mirror_to_master.as_slice()).collect();
            runtime.on_each_host("exchange", |host| Ok(invert_for_host(host, &tables)))?
        };
        for (host, by_origin) in hosts.iter_mut().zip(inverse) {
            host.master_to_mirror = by_origin;
        }
        timings.mirror_ms = elapsed_ms(phase);

        for (host, &assigned) in hosts.iter().zip(placement.host_edge_counts()) {
            if host.num_edges() != assigned {
                return Err(GraphError::Corruption("stored edges differ from assigned load"));
            }
        }
        timings.total_ms = elapsed_ms(started);

        let report = BuildReport {
            num_hosts: options.num_hosts,
            num_virtual_hosts: placement.num_virtual_hosts(),
            virtual_to_physical: placement.virtual_to_physical().iter().map(|h| h.0).collect(),
            hosts: hosts
                .iter()
                .zip(&implicit_counts)
                .zip(placement.host_edge_counts())
                .map(|((h, &implicit_vertices), &assigned_edges)| HostReport {
                    host: h.host.0,
                    masters: h.num_masters(),
                    mirrors: h.num_mirrors(),
                    edges: h.num_edges(),
                    implicit_vertices,
                    assigned_edges,
                })
                .collect(),
            ingest: ingested,
            timings,
            worker_tables,
        };
        info!(
            masters = report.total_masters(),
            mirrors = report.total_mirrors(),
            edges = report.total_edges(),
            total_ms = timings.total_ms,
            "build.complete"
        );
        Ok(MirrorGraph {
            hosts,
            placement,
            runtime,
            metrics,
            report,
        })
    }
}

fn ingest<P>(
    runtime: &Runtime,
    options: &BuildOptions,
    inputs: &[InputSource],
    parser: &P,
    metrics: &dyn BuildMetrics,
) -> Result<Vec<IngestWorker<P::VertexPayload, P::EdgePayload>>>
where
    P: RecordParser,
{
    let lens = inputs
        .iter()
        .map(InputSource::len)
        .collect::<Result<Vec<u64>>>()?;
    let ctx = IngestContext {
        comment: options.comment,
        bad_records: options.bad_records,
        metrics,
    };
    let num_workers = runtime.num_workers();
    runtime.on_each_worker("ingest", |id| {
        let mut worker = IngestWorker::new(id, options.rename_max_load);
        for (source, &len) in inputs.iter().zip(&lens) {
            for segment in worker_segments(len, id, num_workers, options.segments_per_worker) {
                worker.ingest_segment(parser, source, segment, ctx)?;
            }
        }
        debug!(
            worker = id,
            host = runtime.host_of_worker(id).0,
            edges = worker.num_edges(),
            vertices = worker.vertices().len(),
            "build.ingest.worker"
        );
        Ok(worker)
    })
}

/// Turns a resolved draft into its final partition: numbers mirrors after
/// masters, compresses adjacency and creates mirror payloads.
fn compact<V, E, F>(
    draft: HostDraft<V, E>,
    mirror_to_master: Vec<MirrorToMaster>,
    max_load: f32,
    implicit: &F,
    metrics: &dyn BuildMetrics,
) -> Result<HostPartition<V, E>>
where
    F: Fn(VertexToken) -> V,
{
    let num_masters = draft.masters.len();
    let base = num_masters as u64;
    let csr = gather(draft.adjacency, num_masters, |dst| match dst {
        DraftDst::Master(tid) => TopologyId(tid),
        DraftDst::Mirror(k) => TopologyId(base + k),
    })?;

    let mut mirror_ids = RenameTable::new().max_load_factor(max_load);
    mirror_ids.initialize(draft.mirror_tokens.len())?;
    let mut mirrors = Vec::new();
    mirrors
        .try_reserve_exact(draft.mirror_tokens.len())
        .map_err(GraphError::bad_alloc(draft.mirror_tokens.len()))?;
    for (k, &token) in draft.mirror_tokens.iter().enumerate() {
        mirror_ids.put(token, TopologyId(base + k as u64))?;
        mirrors.push(implicit(token));
    }
    metrics.mirrors_created(mirrors.len() as u64);

    let mut tokens = draft.master_tokens;
    tokens.extend_from_slice(&draft.mirror_tokens);
    let dirty = DirtyBitset::new(tokens.len());
    debug!(
        host = draft.host.0,
        masters = num_masters,
        mirrors = mirrors.len(),
        edges = csr.num_edges(),
        "graph.compact.host"
    );
    Ok(HostPartition {
        host: draft.host,
        tokens,
        masters: draft.masters,
        mirrors,
        master_ids: draft.master_ids,
        mirror_ids,
        csr,
        mirror_to_master,
        master_to_mirror: Vec::new(),
        dirty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{EdgeListParser, WmdParser};
    use crate::metrics::CounterMetrics;
    use crate::options::{BadRecordPolicy, UndeclaredVertexPolicy};
    use crate::types::{HostId, VertexRef};

    #[test]
    fn three_edges_keep_insertion_order() -> Result<()> {
        let graph: MirrorGraph<(), ()> = GraphBuilder::new(BuildOptions::new(1).workers_per_host(1))
            .input(InputSource::memory("tiny", "0 0\n0 1\n0 2\n"))
            .build(&EdgeListParser::new(3), |_, _| (), |_| ())?;
        let zero = graph.topology_id(VertexToken(0)).unwrap();
        let dsts: Vec<u64> = graph.edges(zero).map(|e| graph.token_id(graph.edge_dst(e)).0).collect();
        assert_eq!(dsts, vec![0, 1, 2]);
        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.report().total_mirrors(), 0);
        Ok(())
    }

    #[test]
    fn retained_tables_show_up_in_report() -> Result<()> {
        let graph: MirrorGraph<(), ()> = GraphBuilder::new(
            BuildOptions::new(2).workers_per_host(2).retain_worker_tables(true),
        )
        .input(InputSource::memory("el", "0 1\n1 2\n2 3\n3 0\n"))
        .build(&EdgeListParser::new(4), |_, _| (), |_| ())?;
        let tables = graph.report().worker_tables.as_ref().unwrap();
        assert_eq!(tables.len(), 4);
        assert_eq!(tables.iter().map(|t| t.len()).sum::<usize>(), 4);
        Ok(())
    }

    #[test]
    fn full_rename_load_factor_builds() -> Result<()> {
        let text: String = (0..9).map(|src| format!("{src} 0\n")).collect();
        let graph: MirrorGraph<(), ()> = GraphBuilder::new(
            BuildOptions::new(1).workers_per_host(1).rename_max_load(1.0),
        )
        .input(InputSource::memory("star", text))
        .build(&EdgeListParser::new(9), |_, _| (), |_| ())?;
        assert_eq!(graph.num_edges_total(), 9);
        assert_eq!(graph.num_vertices(), 9);
        Ok(())
    }

    #[test]
    fn tables_are_released_by_default() -> Result<()> {
        let graph: MirrorGraph<(), ()> = GraphBuilder::new(BuildOptions::new(1))
            .input(InputSource::memory("el", "0 1\n"))
            .build(&EdgeListParser::new(2), |_, _| (), |_| ())?;
        assert!(graph.report().worker_tables.is_none());
        Ok(())
    }

    #[test]
    fn implicit_remote_endpoints_become_masters() -> Result<()> {
        let metrics = Arc::new(CounterMetrics::default());
        let text = "Person,1,,,,,,,,\nSale,1,2,,,,,,,\nSale,1,3,,,,,,,\n";
        let graph: MirrorGraph<u64, ()> = GraphBuilder::new(
            BuildOptions::new(3).scale_factor(1).workers_per_host(1).metrics(metrics.clone()),
        )
        .input(InputSource::memory("wmd", text))
        .build(&WmdParser::new(), |t, kind| if kind.is_some() { t.0 } else { 1000 + t.0 }, |_| ())?;
        assert_eq!(graph.num_vertices(), 3);
        for token in [2u64, 3] {
            let v = graph.topology_id(VertexToken(token)).unwrap();
            assert_eq!(*graph.data(v), 1000 + token);
        }
        let implicit: u64 = graph.report().hosts.iter().map(|h| h.implicit_vertices).sum();
        assert_eq!(implicit, 2);
        assert_eq!(metrics.snapshot().mirrors_created, graph.report().total_mirrors());
        Ok(())
    }

    #[test]
    fn reject_policy_aborts_build() {
        let err = GraphBuilder::new(
            BuildOptions::new(2).undeclared_vertices(UndeclaredVertexPolicy::Reject),
        )
        .input(InputSource::memory("wmd", "Person,1,,,,,,,,\nSale,1,2,,,,,,,\n"))
        .build(&WmdParser::new(), |_, _| (), |_| ())
        .err()
        .unwrap();
        assert!(matches!(err, GraphError::UndeclaredVertex(_)));
    }

    #[test]
    fn bad_records_abort_or_skip() -> Result<()> {
        let text = "Person,1,,,,,,,,\nMystery,1,,,,,,,,\nPerson,2,,,,,,,,\n";
        let strict = GraphBuilder::new(BuildOptions::new(1).workers_per_host(1))
            .input(InputSource::memory("wmd", text))
            .build(&WmdParser::new(), |_, _| (), |_| ());
        match strict {
            Err(err) => {
                assert!(err.is_record_level());
                assert!(err.to_string().starts_with("wmd@17:"));
            }
            Ok(_) => panic!("unknown tag must abort"),
        }

        let lenient: MirrorGraph<(), ()> = GraphBuilder::new(
            BuildOptions::new(1).workers_per_host(1).bad_records(BadRecordPolicy::Skip),
        )
        .input(InputSource::memory("wmd", text))
        .build(&WmdParser::new(), |_, _| (), |_| ())?;
        assert_eq!(lenient.num_vertices(), 2);
        assert_eq!(lenient.report().ingest.rejected, 1);
        Ok(())
    }

    #[test]
    fn per_host_counts_match_assignment() -> Result<()> {
        let text: String = (0..50u64).map(|i| format!("{} {}\n", i % 7, (i * 13) % 50)).collect();
        let graph: MirrorGraph<(), ()> = GraphBuilder::new(BuildOptions::new(3).workers_per_host(2))
            .input(InputSource::memory("el", text))
            .build(&EdgeListParser::new(50), |_, _| (), |_| ())?;
        for (h, report) in graph.report().hosts.iter().enumerate() {
            assert_eq!(report.edges, report.assigned_edges);
            assert_eq!(report.masters, graph.host(HostId(h as u32)).num_masters());
        }
        assert_eq!(graph.num_edges_total(), 50);
        assert_eq!(graph.num_vertices(), 50);
        let any = VertexRef::new(HostId(0), TopologyId(0));
        assert!(graph.is_master(any));
        Ok(())
    }
}
