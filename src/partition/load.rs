use std::sync::atomic::{AtomicU64, Ordering};

use crate::ingest::RawEdge;
use crate::types::VirtualHostId;

/// Edge count owned by one virtual host.
///
/// Ordering is by `(edges, vhost)`, the order the assigner walks in reverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualHostLoad {
    /// Edges whose source maps to `vhost`.
    pub edges: u64,
    /// The virtual host.
    pub vhost: VirtualHostId,
}

/// Shared per-virtual-host edge counters filled concurrently by workers.
#[derive(Debug)]
pub struct LoadAccountant {
    counts: Vec<AtomicU64>,
}

impl LoadAccountant {
    /// Creates zeroed counters.
    pub fn new(num_virtual_hosts: usize) -> Self {
        Self {
            counts: (0..num_virtual_hosts).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of counters.
    pub fn num_virtual_hosts(&self) -> usize {
        self.counts.len()
    }

    /// Charges `edges` to `vhost`.
    pub fn add(&self, vhost: VirtualHostId, edges: u64) {
        self.counts[vhost.index()].fetch_add(edges, Ordering::Relaxed);
    }

    /// Adds one worker's edge groups; every edge of a group shares its source.
    pub fn account_groups<P>(&self, groups: &[Vec<RawEdge<P>>]) {
        let n = self.counts.len();
        for group in groups {
            if let Some(first) = group.first() {
                self.add(first.src.virtual_host(n), group.len() as u64);
            }
        }
    }

    /// One entry per virtual host in id order, zero for hosts nothing mapped to.
    pub fn loads(&self) -> Vec<VirtualHostLoad> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, count)| VirtualHostLoad {
                edges: count.load(Ordering::Relaxed),
                vhost: VirtualHostId(i as u32),
            })
            .collect()
    }

    /// Edges charged across all virtual hosts.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_charged_to_source_virtual_host() {
        let acc = LoadAccountant::new(4);
        let groups = vec![
            vec![RawEdge::<()>::new(5u64, 1u64, None), RawEdge::new(5u64, 2u64, None)],
            vec![RawEdge::new(2u64, 1u64, None)],
            vec![],
        ];
        acc.account_groups(&groups);
        acc.account_groups(&groups[1..]);
        let loads: Vec<u64> = acc.loads().iter().map(|l| l.edges).collect();
        assert_eq!(loads, vec![0, 2, 2, 0]);
        assert_eq!(acc.total(), 4);
    }

    #[test]
    fn concurrent_accounting_sums_exactly() {
        let acc = LoadAccountant::new(3);
        let groups: Vec<Vec<RawEdge<()>>> = (0..30u64)
            .map(|src| vec![RawEdge::new(src, 0u64, None); 2])
            .collect();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| acc.account_groups(&groups));
            }
        });
        assert!(acc.loads().iter().all(|l| l.edges == 8 * 20));
    }
}
