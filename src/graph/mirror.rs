//! Index tables relating mirrors to their masters.
//!
//! Each host holds a [`MirrorToMaster`] entry per local mirror, sorted by
//! mirror id, and per origin host the inverse [`MasterToMirror`] entries for
//! the mirrors that origin keeps of local masters.

use tracing::debug;

use crate::partition::{HostDraft, Placement};
use crate::types::{GraphError, HostId, Result, TopologyId, VertexRef};

/// A local mirror and the master it replicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirrorToMaster {
    /// Local mirror slot.
    pub mirror: TopologyId,
    /// Master on its owning host.
    pub master: VertexRef,
}

/// A local master and one remote mirror of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MasterToMirror {
    /// Local master slot.
    pub master: TopologyId,
    /// Mirror on the remote host.
    pub mirror: VertexRef,
}

/// Resolves the master of every mirror in `draft` against the owning hosts' tables.
///
/// Mirror `k` (creation order) gets local id `num_masters + k`, so the
/// result is sorted by mirror id.
pub(crate) fn resolve_mirrors<V, E>(
    draft: &HostDraft<V, E>,
    drafts: &[HostDraft<V, E>],
    placement: &Placement,
) -> Result<Vec<MirrorToMaster>> {
    let base = draft.num_masters();
    let mut entries = Vec::new();
    entries
        .try_reserve_exact(draft.mirror_tokens.len())
        .map_err(GraphError::bad_alloc(draft.mirror_tokens.len()))?;
    for (k, token) in draft.mirror_tokens.iter().enumerate() {
        let owner = placement.host_of(*token);
        if owner == draft.host {
            return Err(GraphError::Corruption("mirror of a locally owned token"));
        }
        let tid = drafts
            .get(owner.index())
            .and_then(|o| o.master_ids.get_copied(token))
            .ok_or(GraphError::Corruption("mirror without master"))?;
        entries.push(MirrorToMaster {
            mirror: TopologyId(base + k as u64),
            master: VertexRef::new(owner, tid),
        });
    }
    Ok(entries)
}

/// Builds `host`'s inverse tables from every host's mirror table.
///
/// The result is indexed by origin host; the slot for `host` itself stays empty.
pub(crate) fn invert_for_host(host: HostId, mirror_tables: &[&[MirrorToMaster]]) -> Vec<Vec<MasterToMirror>> {
    let out: Vec<Vec<MasterToMirror>> = mirror_tables
        .iter()
        .enumerate()
        .map(|(origin, table)| {
            table
                .iter()
                .filter(|entry| entry.master.host == host)
                .map(|entry| MasterToMirror {
                    master: entry.master.tid,
                    mirror: VertexRef::new(HostId(origin as u32), entry.mirror),
                })
                .collect()
        })
        .collect();
    debug!(
        host = host.0,
        remote_mirrors = out.iter().map(Vec::len).sum::<usize>(),
        "graph.mirror.exchange"
    );
    out
}

/// Master of local mirror `mirror`, found by binary search.
pub fn lookup_master(table: &[MirrorToMaster], mirror: TopologyId) -> Option<VertexRef> {
    table
        .binary_search_by_key(&mirror, |entry| entry.mirror)
        .ok()
        .map(|idx| table[idx].master)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mirror: u64, host: u32, tid: u64) -> MirrorToMaster {
        MirrorToMaster {
            mirror: TopologyId(mirror),
            master: VertexRef::new(HostId(host), TopologyId(tid)),
        }
    }

    #[test]
    fn inversion_groups_by_origin() {
        let h0 = vec![entry(3, 1, 0), entry(4, 2, 7)];
        let h1: Vec<MirrorToMaster> = vec![];
        let h2 = vec![entry(5, 1, 2), entry(6, 1, 0)];
        let tables = vec![h0.as_slice(), h1.as_slice(), h2.as_slice()];
        let inv = invert_for_host(HostId(1), &tables);
        assert_eq!(inv.len(), 3);
        assert_eq!(
            inv[0],
            vec![MasterToMirror {
                master: TopologyId(0),
                mirror: VertexRef::new(HostId(0), TopologyId(3)),
            }]
        );
        assert!(inv[1].is_empty());
        let masters: Vec<u64> = inv[2].iter().map(|e| e.master.0).collect();
        assert_eq!(masters, vec![2, 0]);
    }

    #[test]
    fn lookup_uses_sorted_mirror_ids() {
        let table = vec![entry(10, 1, 4), entry(11, 2, 0), entry(14, 1, 9)];
        assert_eq!(
            lookup_master(&table, TopologyId(14)),
            Some(VertexRef::new(HostId(1), TopologyId(9)))
        );
        assert_eq!(lookup_master(&table, TopologyId(12)), None);
    }
}
