use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::partition::VirtualHostLoad;
use crate::types::{GraphError, HostId, Result, VertexToken, VirtualHostId};

/// Virtual-to-physical host map plus the edge load each host received.
///
/// Read-only once computed; every host consults it to find token owners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    v2p: Vec<HostId>,
    host_edges: Vec<u64>,
}

impl Placement {
    /// Number of physical hosts.
    pub fn num_hosts(&self) -> usize {
        self.host_edges.len()
    }

    /// Number of virtual hosts.
    pub fn num_virtual_hosts(&self) -> usize {
        self.v2p.len()
    }

    /// Physical host owning the master of `token`.
    #[inline]
    pub fn host_of(&self, token: VertexToken) -> HostId {
        self.v2p[token.virtual_host(self.v2p.len()).index()]
    }

    /// Physical host of `vhost`.
    #[inline]
    pub fn host_of_virtual(&self, vhost: VirtualHostId) -> HostId {
        self.v2p[vhost.index()]
    }

    /// Physical host of every virtual host.
    pub fn virtual_to_physical(&self) -> &[HostId] {
        &self.v2p
    }

    /// Edges charged to each host by the assignment.
    pub fn host_edge_counts(&self) -> &[u64] {
        &self.host_edges
    }
}

/// Greedy longest-first assignment of virtual hosts to `num_hosts` hosts.
///
/// Virtual hosts are taken heaviest first (equal loads: higher id first) and
/// each goes to the host with the smallest running load, lowest id on ties.
/// The worst host ends at most one virtual host's load above the mean.
pub fn assign_hosts(loads: &[VirtualHostLoad], num_hosts: usize) -> Result<Placement> {
    if num_hosts == 0 {
        return Err(GraphError::Invalid("num_hosts must be at least 1"));
    }
    if num_hosts > u32::MAX as usize {
        return Err(GraphError::Invalid("num_hosts does not fit a host id"));
    }
    let mut v2p = vec![HostId(0); loads.len()];
    let mut host_edges = vec![0u64; num_hosts];
    let mut heap: BinaryHeap<Reverse<(u64, u32)>> =
        (0..num_hosts as u32).map(|h| Reverse((0, h))).collect();

    for load in heaviest_first(loads) {
        let slot = v2p
            .get_mut(load.vhost.index())
            .ok_or(GraphError::Invalid("virtual host id out of range"))?;
        let Some(Reverse((current, host))) = heap.pop() else {
            return Err(GraphError::Corruption("host heap drained"));
        };
        *slot = HostId(host);
        let next = current + load.edges;
        host_edges[host as usize] = next;
        heap.push(Reverse((next, host)));
    }
    debug!(
        hosts = num_hosts,
        virtual_hosts = loads.len(),
        max_edges = host_edges.iter().copied().max().unwrap_or(0),
        min_edges = host_edges.iter().copied().min().unwrap_or(0),
        "partition.assign.complete"
    );
    Ok(Placement { v2p, host_edges })
}

fn heaviest_first(loads: &[VirtualHostLoad]) -> impl Iterator<Item = &VirtualHostLoad> {
    let mut sorted: Vec<&VirtualHostLoad> = loads.iter().collect();
    sorted.sort_unstable();
    sorted.into_iter().rev()
}
