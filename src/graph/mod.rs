//! The partitioned graph handed to algorithms once construction completes.
//!
//! Every host owns a [`HostPartition`]: its masters in `[0, num_masters)`,
//! its mirrors after them, compressed out-edges of its masters and the
//! master/mirror index tables. Topology never changes after construction;
//! only vertex and edge payloads and dirty bits are mutable.

mod builder;
mod csr;
mod mirror;
mod sync;

pub use builder::{BuildReport, GraphBuilder, HostReport, PhaseTimings};
pub use mirror::{lookup_master, MasterToMirror, MirrorToMaster};
pub use sync::SyncMode;

use std::ops::Range;
use std::sync::Arc;

use crate::containers::{DirtyBitset, RenameTable};
use crate::metrics::BuildMetrics;
use crate::partition::Placement;
use crate::runtime::Runtime;
use crate::types::{EdgeHandle, HostId, TopologyId, VertexRef, VertexToken};

use csr::Csr;

/// One host's slice of the graph.
pub struct HostPartition<V, E> {
    host: HostId,
    tokens: Vec<VertexToken>,
    masters: Vec<V>,
    mirrors: Vec<V>,
    master_ids: RenameTable<VertexToken, TopologyId>,
    mirror_ids: RenameTable<VertexToken, TopologyId>,
    csr: Csr<E>,
    mirror_to_master: Vec<MirrorToMaster>,
    master_to_mirror: Vec<Vec<MasterToMirror>>,
    dirty: DirtyBitset,
}

impl<V, E> HostPartition<V, E> {
    /// Host this partition lives on.
    pub fn host(&self) -> HostId {
        self.host
    }

    /// Number of local masters.
    pub fn num_masters(&self) -> u64 {
        self.masters.len() as u64
    }

    /// Number of local mirrors.
    pub fn num_mirrors(&self) -> u64 {
        self.mirrors.len() as u64
    }

    /// Masters plus mirrors.
    pub fn num_vertices(&self) -> u64 {
        self.tokens.len() as u64
    }

    /// Out-edges stored on this host.
    pub fn num_edges(&self) -> u64 {
        self.csr.num_edges()
    }

    /// Slots holding masters.
    pub fn master_range(&self) -> Range<u64> {
        0..self.num_masters()
    }

    /// Slots holding mirrors.
    pub fn mirror_range(&self) -> Range<u64> {
        self.num_masters()..self.num_vertices()
    }

    /// Token of every local slot, masters first.
    pub fn tokens(&self) -> &[VertexToken] {
        &self.tokens
    }

    /// Master payloads by slot.
    pub fn masters(&self) -> &[V] {
        &self.masters
    }

    /// Mirror payloads, slot `num_masters()` first.
    pub fn mirrors(&self) -> &[V] {
        &self.mirrors
    }

    /// Local mirrors with their masters, sorted by mirror id.
    pub fn mirror_to_master(&self) -> &[MirrorToMaster] {
        &self.mirror_to_master
    }

    /// Remote mirrors of local masters, indexed by the host holding the mirror.
    pub fn master_to_mirror(&self) -> &[Vec<MasterToMirror>] {
        &self.master_to_mirror
    }

    /// Dirty flag of every local slot.
    pub fn dirty(&self) -> &DirtyBitset {
        &self.dirty
    }

    /// Local slot of `token`, master or mirror.
    pub fn local_id(&self, token: VertexToken) -> Option<TopologyId> {
        self.master_ids
            .get_copied(&token)
            .or_else(|| self.mirror_ids.get_copied(&token))
    }

    #[inline]
    fn is_master_slot(&self, tid: TopologyId) -> bool {
        tid.0 < self.num_masters()
    }

    fn slot(&self, tid: TopologyId) -> &V {
        let idx = tid.index();
        match idx.checked_sub(self.masters.len()) {
            None => &self.masters[idx],
            Some(k) => &self.mirrors[k],
        }
    }

    fn slot_mut(&mut self, tid: TopologyId) -> &mut V {
        let idx = tid.index();
        match idx.checked_sub(self.masters.len()) {
            None => &mut self.masters[idx],
            Some(k) => &mut self.mirrors[k],
        }
    }

    fn edge_range(&self, tid: TopologyId) -> Range<u64> {
        if self.is_master_slot(tid) {
            self.csr.offsets[tid.index()]..self.csr.offsets[tid.index() + 1]
        } else {
            0..0
        }
    }
}

/// A graph split into master and mirror partitions over a fixed set of hosts.
///
/// Vertex accessors take a [`VertexRef`] and panic when it does not name a
/// slot of this graph, the same contract as slice indexing. Lookups keyed by
/// token return `Option`.
pub struct MirrorGraph<V, E> {
    hosts: Vec<HostPartition<V, E>>,
    placement: Placement,
    runtime: Runtime,
    metrics: Arc<dyn BuildMetrics>,
    report: BuildReport,
}

impl<V, E> MirrorGraph<V, E> {
    /// Number of physical hosts.
    pub fn num_hosts(&self) -> usize {
        self.hosts.len()
    }

    /// Token to host assignment used by the build.
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Runtime shape used for per-host work.
    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Partition of `host`.
    pub fn host(&self, host: HostId) -> &HostPartition<V, E> {
        &self.hosts[host.index()]
    }

    /// Every partition in host order.
    pub fn hosts(&self) -> &[HostPartition<V, E>] {
        &self.hosts
    }

    /// Every local slot of `host`, masters then mirrors.
    pub fn vertices(&self, host: HostId) -> impl Iterator<Item = VertexRef> + '_ {
        (0..self.host(host).num_vertices()).map(move |tid| VertexRef::new(host, TopologyId(tid)))
    }

    /// Master slots of `host`.
    pub fn local_master_range(&self, host: HostId) -> Range<u64> {
        self.host(host).master_range()
    }

    /// Mirror slots of `host`.
    pub fn local_mirror_range(&self, host: HostId) -> Range<u64> {
        self.host(host).mirror_range()
    }

    /// Distinct tokens in the graph, i.e. the total number of masters.
    pub fn num_vertices(&self) -> u64 {
        self.hosts.iter().map(HostPartition::num_masters).sum()
    }

    /// Edges stored across every host.
    pub fn num_edges_total(&self) -> u64 {
        self.hosts.iter().map(HostPartition::num_edges).sum()
    }

    /// Payload of `v`.
    pub fn data(&self, v: VertexRef) -> &V {
        self.host(v.host).slot(v.tid)
    }

    /// Mutable payload of `v`.
    pub fn data_mut(&mut self, v: VertexRef) -> &mut V {
        self.hosts[v.host.index()].slot_mut(v.tid)
    }

    /// Replaces the payload of `v`.
    pub fn set_data(&mut self, v: VertexRef, value: V) {
        *self.data_mut(v) = value;
    }

    /// Out-edges of `v`; mirrors have none.
    pub fn edges(&self, v: VertexRef) -> impl Iterator<Item = EdgeHandle> {
        let host = v.host;
        self.host(host)
            .edge_range(v.tid)
            .map(move |index| EdgeHandle { host, index })
    }

    /// Out-degree of `v`.
    pub fn num_edges(&self, v: VertexRef) -> u64 {
        let range = self.host(v.host).edge_range(v.tid);
        range.end - range.start
    }

    /// Destination slot of `edge`, on the same host as its source.
    pub fn edge_dst(&self, edge: EdgeHandle) -> VertexRef {
        let tid = self.host(edge.host).csr.dsts[edge.index as usize];
        VertexRef::new(edge.host, tid)
    }

    /// Destination of the `offset`-th out-edge of `v`.
    pub fn edge_dst_at(&self, v: VertexRef, offset: u64) -> Option<VertexRef> {
        let range = self.host(v.host).edge_range(v.tid);
        let index = range.start.checked_add(offset).filter(|i| *i < range.end)?;
        Some(self.edge_dst(EdgeHandle { host: v.host, index }))
    }

    /// Payload of `edge`.
    pub fn edge_data(&self, edge: EdgeHandle) -> &E {
        &self.host(edge.host).csr.data[edge.index as usize]
    }

    /// Mutable payload of `edge`.
    pub fn edge_data_mut(&mut self, edge: EdgeHandle) -> &mut E {
        &mut self.hosts[edge.host.index()].csr.data[edge.index as usize]
    }

    /// Replaces the payload of `edge`.
    pub fn set_edge_data(&mut self, edge: EdgeHandle, value: E) {
        *self.edge_data_mut(edge) = value;
    }

    /// Input token stored in slot `v`.
    pub fn token_id(&self, v: VertexRef) -> VertexToken {
        self.host(v.host).tokens[v.tid.index()]
    }

    /// Master slot of `token`, if the graph has it.
    pub fn topology_id(&self, token: VertexToken) -> Option<VertexRef> {
        let owner = self.placement.host_of(token);
        self.host(owner)
            .master_ids
            .get_copied(&token)
            .map(|tid| VertexRef::new(owner, tid))
    }

    /// Slot of `token` on `host`, master or mirror.
    pub fn local_topology_id(&self, host: HostId, token: VertexToken) -> Option<TopologyId> {
        self.host(host).local_id(token)
    }

    /// Host whose memory holds the slot `v`.
    pub fn locality_vertex(&self, v: VertexRef) -> HostId {
        v.host
    }

    /// Host owning the master of `token`.
    pub fn physical_host_id(&self, token: VertexToken) -> HostId {
        self.placement.host_of(token)
    }

    /// True when `v` is a master slot.
    pub fn is_master(&self, v: VertexRef) -> bool {
        self.host(v.host).is_master_slot(v.tid)
    }

    /// True when `v` is a mirror slot.
    pub fn is_mirror(&self, v: VertexRef) -> bool {
        !self.is_master(v) && v.tid.0 < self.host(v.host).num_vertices()
    }

    /// Whether `host` keeps any slot for `token`.
    pub fn is_local(&self, host: HostId, token: VertexToken) -> bool {
        self.local_topology_id(host, token).is_some()
    }

    /// The master behind `v`: itself for masters, the resolved entry for mirrors.
    pub fn master_of(&self, v: VertexRef) -> Option<VertexRef> {
        if self.is_master(v) {
            return Some(v);
        }
        lookup_master(&self.host(v.host).mirror_to_master, v.tid)
    }

    /// Mirror table of `host`, sorted by mirror id.
    pub fn mirror_to_master(&self, host: HostId) -> &[MirrorToMaster] {
        &self.host(host).mirror_to_master
    }

    /// Master-side buckets of `host`, indexed by the host holding each mirror.
    pub fn master_to_mirror(&self, host: HostId) -> &[Vec<MasterToMirror>] {
        &self.host(host).master_to_mirror
    }

    /// Flags `v` as changed since the last synchronisation; returns the previous flag.
    pub fn mark_dirty(&self, v: VertexRef) -> bool {
        self.host(v.host).dirty.set(v.tid.index())
    }

    /// Reads the dirty flag of `v`.
    pub fn is_dirty(&self, v: VertexRef) -> bool {
        self.host(v.host).dirty.get(v.tid.index())
    }

    /// Clears every dirty bit on every host.
    pub fn clear_dirty(&mut self) {
        for host in &mut self.hosts {
            host.dirty.clear();
        }
    }

    /// Sets every dirty bit on every host.
    pub fn mark_all_dirty(&mut self) {
        for host in &mut self.hosts {
            host.dirty.set_all();
        }
    }

    /// Summary of how the graph was built.
    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Drops the graph, keeping only its build report.
    pub fn into_report(self) -> BuildReport {
        self.report
    }
}
