//! Mirror/master reconciliation.
//!
//! `sync` and `reduce` both run `merge(mirror, master)` once per mirror, at
//! the master's host. `sync` walks each host's mirror table and ships one
//! batch of invocations per destination host; `reduce` walks each host's
//! inverse table grouped by origin. Both apply merges for one master in the
//! same order (origin host ascending, then mirror id ascending), so they
//! agree even for merges that do not commute. `broadcast` runs the other
//! way and overwrites mirrors from their masters.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::containers::DirtyBitset;
use crate::graph::{HostPartition, MasterToMirror, MirrorGraph, MirrorToMaster};
use crate::runtime::{do_all, join_all};
use crate::types::{HostId, Result};

/// Which replicas take part in a synchronisation round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Every mirror (or master, for broadcast).
    #[default]
    All,
    /// Only slots whose dirty bit is set on their own host.
    DirtyOnly,
}

impl SyncMode {
    #[inline]
    fn admits(self, dirty: &DirtyBitset, slot: usize) -> bool {
        match self {
            SyncMode::All => true,
            SyncMode::DirtyOnly => dirty.get(slot),
        }
    }
}

/// A merge to run at the destination host: mirror `mirror` of the origin into master `master`.
#[derive(Clone, Copy, Debug)]
struct Invocation {
    mirror: usize,
    master: usize,
}

struct MirrorSide<'a, V> {
    mirrors: &'a [V],
    num_masters: usize,
    dirty: &'a DirtyBitset,
}

struct MasterSide<'a, V> {
    masters: &'a [V],
    dirty: &'a DirtyBitset,
}

/// Mutable masters of every host next to read-only views of their mirrors.
#[allow(clippy::type_complexity)]
fn split_masters<V, E>(
    hosts: &mut [HostPartition<V, E>],
) -> (Vec<(&mut Vec<V>, &[Vec<MasterToMirror>])>, Vec<MirrorSide<'_, V>>) {
    let mut writable = Vec::with_capacity(hosts.len());
    let mut readable = Vec::with_capacity(hosts.len());
    for host in hosts.iter_mut() {
        let num_masters = host.masters.len();
        let HostPartition {
            ref mut masters,
            ref mirrors,
            ref dirty,
            ref master_to_mirror,
            ..
        } = *host;
        writable.push((masters, master_to_mirror.as_slice()));
        readable.push(MirrorSide {
            mirrors: mirrors.as_slice(),
            num_masters,
            dirty,
        });
    }
    (writable, readable)
}

/// Mutable mirrors of every host next to read-only views of their masters.
#[allow(clippy::type_complexity)]
fn split_mirrors<V, E>(
    hosts: &mut [HostPartition<V, E>],
) -> (Vec<(&mut Vec<V>, usize, &[MirrorToMaster])>, Vec<MasterSide<'_, V>>) {
    let mut writable = Vec::with_capacity(hosts.len());
    let mut readable = Vec::with_capacity(hosts.len());
    for host in hosts.iter_mut() {
        let num_masters = host.masters.len();
        let HostPartition {
            ref masters,
            ref mut mirrors,
            ref dirty,
            ref mirror_to_master,
            ..
        } = *host;
        writable.push((mirrors, num_masters, mirror_to_master.as_slice()));
        readable.push(MasterSide {
            masters: masters.as_slice(),
            dirty,
        });
    }
    (writable, readable)
}

impl<V, E> MirrorGraph<V, E>
where
    V: Send + Sync,
    E: Send + Sync,
{
    /// Merges mirrors into their masters, driven from the mirror side.
    ///
    /// Each host buckets its (optionally dirty-only) mirrors by master host;
    /// each master host then applies the invocations addressed to it.
    /// Returns the number of merges run. Dirty bits are left untouched.
    pub fn sync<F>(&mut self, mode: SyncMode, merge: F) -> Result<u64>
    where
        F: Fn(&V, &mut V) + Sync,
    {
        let num_hosts = self.hosts.len();
        let runtime = self.runtime;
        let batches: Vec<Vec<Vec<Invocation>>> =
            do_all("sync-scatter", self.hosts.iter(), |origin| {
                let mut per_dest = vec![Vec::new(); num_hosts];
                for entry in &origin.mirror_to_master {
                    let slot = entry.mirror.index();
                    if !mode.admits(&origin.dirty, slot) {
                        continue;
                    }
                    per_dest[entry.master.host.index()].push(Invocation {
                        mirror: slot - origin.masters.len(),
                        master: entry.master.tid.index(),
                    });
                }
                Ok(per_dest)
            })?;

        let counts = {
            let (writable, readable) = split_masters(&mut self.hosts);
            let (batches, readable, merge) = (&batches, &readable, &merge);
            runtime.scope(|s| {
                let mut handles = Vec::with_capacity(num_hosts);
                for (dest, (masters, _)) in writable.into_iter().enumerate() {
                    handles.push(s.execute_on(HostId(dest as u32), move |host| {
                        let mut applied = 0u64;
                        for (origin, per_dest) in batches.iter().enumerate() {
                            let mirrors = readable[origin].mirrors;
                            for inv in &per_dest[host.index()] {
                                merge(&mirrors[inv.mirror], &mut masters[inv.master]);
                                applied += 1;
                            }
                        }
                        Ok(applied)
                    })?);
                }
                join_all(handles)
            })?
        };
        Ok(self.finish("replica.sync", mode, counts))
    }

    /// Merges mirrors into their masters, driven from the master side.
    ///
    /// Same contract and merge order as [`MirrorGraph::sync`].
    pub fn reduce<F>(&mut self, mode: SyncMode, merge: F) -> Result<u64>
    where
        F: Fn(&V, &mut V) + Sync,
    {
        let counts = {
            let (writable, readable) = split_masters(&mut self.hosts);
            let readable = &readable;
            do_all("sync-reduce", writable, |(masters, by_origin)| {
                let mut applied = 0u64;
                for (origin, entries) in by_origin.iter().enumerate() {
                    let side = &readable[origin];
                    for entry in entries {
                        let slot = entry.mirror.tid.index();
                        if !mode.admits(side.dirty, slot) {
                            continue;
                        }
                        let mirror = &side.mirrors[slot - side.num_masters];
                        merge(mirror, &mut masters[entry.master.index()]);
                        applied += 1;
                    }
                }
                Ok(applied)
            })?
        };
        Ok(self.finish("replica.reduce", mode, counts))
    }

    /// Overwrites mirrors from their masters with `apply(master, mirror)`.
    ///
    /// With [`SyncMode::DirtyOnly`] only masters whose dirty bit is set are pushed out.
    pub fn broadcast<F>(&mut self, mode: SyncMode, apply: F) -> Result<u64>
    where
        F: Fn(&V, &mut V) + Sync,
    {
        let runtime = self.runtime;
        let applied = AtomicU64::new(0);
        {
            let (writable, readable) = split_mirrors(&mut self.hosts);
            let (readable, apply, applied) = (&readable, &apply, &applied);
            runtime.scope(|s| {
                for (host, (mirrors, num_masters, table)) in writable.into_iter().enumerate() {
                    s.execute_detached(HostId(host as u32), move |_| {
                        let mut count = 0u64;
                        for entry in table {
                            let master = entry.master;
                            let side = &readable[master.host.index()];
                            if !mode.admits(side.dirty, master.tid.index()) {
                                continue;
                            }
                            let k = entry.mirror.index() - num_masters;
                            apply(&side.masters[master.tid.index()], &mut mirrors[k]);
                            count += 1;
                        }
                        applied.fetch_add(count, Ordering::Relaxed);
                        Ok(())
                    })?;
                }
                s.wait()
            })?;
        }
        let total = applied.load(Ordering::Relaxed);
        Ok(self.finish("replica.broadcast", mode, vec![total]))
    }

    fn finish(&self, event: &'static str, mode: SyncMode, counts: Vec<u64>) -> u64 {
        let total: u64 = counts.iter().sum();
        self.metrics.merges_applied(total);
        debug!(op = event, mode = ?mode, merges = total, "replica.round.complete");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::ingest::{EdgeListParser, InputSource};
    use crate::metrics::CounterMetrics;
    use crate::options::BuildOptions;
    use crate::types::{TopologyId, VertexRef};
    use std::sync::Arc;

    fn ring(hosts: usize, n: u64) -> Result<MirrorGraph<u64, ()>> {
        let text: String = (0..n).map(|i| format!("{} {}\n", i, (i + 1) % n)).collect();
        GraphBuilder::new(BuildOptions::new(hosts).scale_factor(2).workers_per_host(1))
            .input(InputSource::memory("ring", text))
            .build(&EdgeListParser::new(n), |_, _| 0u64, |_| ())
    }

    fn set_mirrors(graph: &mut MirrorGraph<u64, ()>, value: u64) {
        for host in HostId::all(graph.num_hosts()) {
            for tid in graph.local_mirror_range(host) {
                graph.set_data(VertexRef::new(host, TopologyId(tid)), value);
            }
        }
    }

    #[test]
    fn sync_adds_every_mirror_once() -> Result<()> {
        let mut graph = ring(3, 24)?;
        set_mirrors(&mut graph, 5);
        let total_mirrors: u64 = graph.hosts().iter().map(|h| h.num_mirrors()).sum();
        assert!(total_mirrors > 0);
        let merges = graph.sync(SyncMode::All, |mirror, master| *master += *mirror)?;
        assert_eq!(merges, total_mirrors);
        let summed: u64 = graph.hosts().iter().flat_map(|h| h.masters().iter()).sum();
        assert_eq!(summed, 5 * total_mirrors);
        Ok(())
    }

    #[test]
    fn dirty_only_skips_clean_mirrors() -> Result<()> {
        let mut graph = ring(2, 16)?;
        set_mirrors(&mut graph, 1);
        let first = graph
            .hosts()
            .iter()
            .find_map(|h| h.mirror_to_master().first().copied().map(|e| (h.host(), e)))
            .unwrap();
        let (host, entry) = first;
        graph.mark_dirty(VertexRef::new(host, entry.mirror));
        let merges = graph.sync(SyncMode::DirtyOnly, |mirror, master| *master += *mirror)?;
        assert_eq!(merges, 1);
        assert_eq!(*graph.data(entry.master), 1);
        Ok(())
    }

    #[test]
    fn reduce_agrees_with_sync_on_order_sensitive_merge() -> Result<()> {
        let mut a = ring(4, 40)?;
        let mut b = ring(4, 40)?;
        for graph in [&mut a, &mut b] {
            for host in HostId::all(graph.num_hosts()) {
                for tid in graph.local_mirror_range(host) {
                    graph.set_data(VertexRef::new(host, TopologyId(tid)), u64::from(host.0) * 1000 + tid);
                }
            }
        }
        let fold = |mirror: &u64, master: &mut u64| *master = master.wrapping_mul(31).wrapping_add(*mirror);
        let by_sync = a.sync(SyncMode::All, fold)?;
        let by_reduce = b.reduce(SyncMode::All, fold)?;
        assert_eq!(by_sync, by_reduce);
        for (ha, hb) in a.hosts().iter().zip(b.hosts()) {
            assert_eq!(ha.masters(), hb.masters());
        }
        Ok(())
    }

    #[test]
    fn broadcast_copies_masters_to_mirrors_and_counts_merges() -> Result<()> {
        let metrics = Arc::new(CounterMetrics::default());
        let text: String = (0..12u64).map(|i| format!("{} {}\n", i, (i + 5) % 12)).collect();
        let mut graph: MirrorGraph<u64, ()> = GraphBuilder::new(
            BuildOptions::new(3).scale_factor(1).workers_per_host(1).metrics(metrics.clone()),
        )
        .input(InputSource::memory("skip", text))
        .build(&EdgeListParser::new(12), |t, _| t.0 * 2, |_| ())?;
        set_mirrors(&mut graph, 0);
        let pushed = graph.broadcast(SyncMode::All, |master, mirror| *mirror = *master)?;
        let mut mirrors = 0;
        for host in HostId::all(graph.num_hosts()) {
            for tid in graph.local_mirror_range(host) {
                let v = VertexRef::new(host, TopologyId(tid));
                assert_eq!(*graph.data(v), graph.token_id(v).0 * 2);
                mirrors += 1;
            }
        }
        assert_eq!(pushed, mirrors);
        assert_eq!(metrics.snapshot().merges_applied, mirrors);
        Ok(())
    }
}
