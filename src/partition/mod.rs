//! Load accounting, host assignment and per-host scatter of raw records.
//!
//! After ingestion each host scans every worker's buffers and keeps what it
//! owns: the vertex records whose token maps to it, and the edge groups
//! whose source token maps to it. The result is a [`HostDraft`] holding the
//! host's masters in final order and its adjacency with destinations still
//! split between masters and not-yet-numbered mirrors.

mod assign;
mod load;

pub use assign::{assign_hosts, Placement};
pub use load::{LoadAccountant, VirtualHostLoad};

use tracing::debug;

use crate::containers::RenameTable;
use crate::ingest::{IngestWorker, RawEdge};
use crate::options::UndeclaredVertexPolicy;
use crate::types::{GraphError, HostId, Result, TopologyId, VertexToken};

/// Destination of an edge before mirror ids are fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DraftDst {
    /// Index into the host's masters.
    Master(u64),
    /// Index into the host's mirrors, in creation order.
    Mirror(u64),
}

/// One host's share of the graph between partitioning and mirror resolution.
pub(crate) struct HostDraft<V, E> {
    pub host: HostId,
    pub master_tokens: Vec<VertexToken>,
    pub masters: Vec<V>,
    pub master_ids: RenameTable<VertexToken, TopologyId>,
    pub adjacency: Vec<Vec<(DraftDst, E)>>,
    pub mirror_tokens: Vec<VertexToken>,
    pub mirror_ids: RenameTable<VertexToken, u64>,
    pub implicit: u64,
}

/// What a host needs to turn raw records into local vertices and edges.
pub(crate) struct ScatterInput<'a, VP, EP> {
    pub placement: &'a Placement,
    pub workers: &'a [IngestWorker<VP, EP>],
    pub vertex_domain: Option<u64>,
    pub undeclared: UndeclaredVertexPolicy,
    pub max_load: f32,
}

impl<V, E> HostDraft<V, E> {
    fn new(host: HostId, max_load: f32) -> Self {
        Self {
            host,
            master_tokens: Vec::new(),
            masters: Vec::new(),
            master_ids: RenameTable::new().max_load_factor(max_load),
            adjacency: Vec::new(),
            mirror_tokens: Vec::new(),
            mirror_ids: RenameTable::new().max_load_factor(max_load),
            implicit: 0,
        }
    }

    pub fn num_masters(&self) -> u64 {
        self.masters.len() as u64
    }

    /// Adds a master unless the token already has one; returns its index.
    fn declare(&mut self, token: VertexToken, make: impl FnOnce() -> V) -> Result<u64> {
        if let Some(tid) = self.master_ids.get_copied(&token) {
            return Ok(tid.0);
        }
        let tid = self.num_masters();
        self.master_ids.put(token, TopologyId(tid))?;
        self.master_tokens.push(token);
        self.masters.push(make());
        Ok(tid)
    }

    /// Looks up or creates the master of an endpoint no vertex record declared.
    fn endpoint<F>(
        &mut self,
        token: VertexToken,
        policy: UndeclaredVertexPolicy,
        init: &F,
    ) -> Result<u64>
    where
        F: Fn(VertexToken) -> V,
    {
        if let Some(tid) = self.master_ids.get_copied(&token) {
            return Ok(tid.0);
        }
        match policy {
            UndeclaredVertexPolicy::Reject => Err(GraphError::UndeclaredVertex(token)),
            UndeclaredVertexPolicy::Materialize => {
                self.implicit += 1;
                self.declare(token, || init(token))
            }
        }
    }

    fn mirror(&mut self, token: VertexToken) -> Result<u64> {
        if let Some(k) = self.mirror_ids.get_copied(&token) {
            return Ok(k);
        }
        let k = self.mirror_tokens.len() as u64;
        self.mirror_ids.put(token, k)?;
        self.mirror_tokens.push(token);
        Ok(k)
    }

    /// Creates masters for tokens other hosts mirror but nobody declared.
    pub fn materialize_remote<F>(
        &mut self,
        tokens: &[VertexToken],
        policy: UndeclaredVertexPolicy,
        init: &F,
    ) -> Result<()>
    where
        F: Fn(VertexToken) -> V,
    {
        for &token in tokens {
            self.endpoint(token, policy, init)?;
        }
        Ok(())
    }
}

/// Builds `host`'s draft: masters first, then its edges and mirror candidates.
///
/// Master order is: declared vertices (worker order, first declaration
/// wins), then the vertex domain in ascending token order, then implicit
/// endpoints in edge scan order.
pub(crate) fn scatter_host<VP, EP, V, E, FV, FE>(
    host: HostId,
    input: &ScatterInput<'_, VP, EP>,
    vertex_init: &FV,
    edge_init: &FE,
) -> Result<HostDraft<V, E>>
where
    FV: Fn(VertexToken, Option<&VP>) -> V,
    FE: Fn(&RawEdge<EP>) -> E,
{
    let placement = input.placement;
    let mut draft = HostDraft::new(host, input.max_load);
    let implicit = |token: VertexToken| vertex_init(token, None);

    for worker in input.workers {
        for vertex in worker.vertices() {
            if placement.host_of(vertex.token) == host {
                draft.declare(vertex.token, || vertex_init(vertex.token, vertex.payload.as_ref()))?;
            }
        }
    }
    if let Some(domain) = input.vertex_domain {
        for token in (0..domain).map(VertexToken) {
            if placement.host_of(token) == host {
                draft.declare(token, || implicit(token))?;
            }
        }
    }

    let mut stored = 0u64;
    for worker in input.workers {
        for group in worker.edge_groups() {
            let Some(first) = group.first() else { continue };
            if placement.host_of(first.src) != host {
                continue;
            }
            let src = draft.endpoint(first.src, input.undeclared, &implicit)? as usize;
            if draft.adjacency.len() <= src {
                draft.adjacency.resize_with(src + 1, Vec::new);
            }
            for edge in group {
                let dst = if placement.host_of(edge.dst) == host {
                    DraftDst::Master(draft.endpoint(edge.dst, input.undeclared, &implicit)?)
                } else {
                    DraftDst::Mirror(draft.mirror(edge.dst)?)
                };
                draft.adjacency[src].push((dst, edge_init(edge)));
                stored += 1;
            }
        }
    }
    debug!(
        host = host.0,
        masters = draft.masters.len(),
        implicit = draft.implicit,
        mirrors = draft.mirror_tokens.len(),
        edges = stored,
        "partition.scatter.host"
    );
    Ok(draft)
}

/// Tokens `host` must own because other hosts mirror them.
///
/// Listed in origin host order, then each origin's mirror creation order.
pub(crate) fn remote_references<V, E>(
    host: HostId,
    drafts: &[HostDraft<V, E>],
    placement: &Placement,
) -> Vec<VertexToken> {
    drafts
        .iter()
        .filter(|origin| origin.host != host)
        .flat_map(|origin| origin.mirror_tokens.iter().copied())
        .filter(|token| placement.host_of(*token) == host)
        .collect()
}
