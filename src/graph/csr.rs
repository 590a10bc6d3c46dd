use crate::types::{GraphError, Result, TopologyId};

/// Compressed adjacency: the out-edges of vertex `v` are `offsets[v]..offsets[v + 1]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Csr<E> {
    pub offsets: Vec<u64>,
    pub dsts: Vec<TopologyId>,
    pub data: Vec<E>,
}

impl<E> Csr<E> {
    pub fn degree(&self, v: usize) -> u64 {
        self.offsets[v + 1] - self.offsets[v]
    }

    pub fn num_edges(&self) -> u64 {
        self.dsts.len() as u64
    }
}

/// Flattens per-vertex edge lists into a [`Csr`] over `num_vertices` vertices.
///
/// Vertices past the end of `adjacency` get no edges. `resolve` maps each
/// stored destination to its final local id.
pub(crate) fn gather<D, E>(
    adjacency: Vec<Vec<(D, E)>>,
    num_vertices: usize,
    resolve: impl Fn(D) -> TopologyId,
) -> Result<Csr<E>> {
    if adjacency.len() > num_vertices {
        return Err(GraphError::Corruption("adjacency longer than vertex range"));
    }
    let total: usize = adjacency.iter().map(Vec::len).sum();

    let mut offsets = Vec::new();
    offsets
        .try_reserve_exact(num_vertices + 1)
        .map_err(GraphError::bad_alloc(num_vertices + 1))?;
    let mut dsts = Vec::new();
    dsts.try_reserve_exact(total)
        .map_err(GraphError::bad_alloc(total))?;
    let mut data = Vec::new();
    data.try_reserve_exact(total)
        .map_err(GraphError::bad_alloc(total))?;

    offsets.push(0);
    for edges in adjacency {
        for (dst, value) in edges {
            dsts.push(resolve(dst));
            data.push(value);
        }
        offsets.push(dsts.len() as u64);
    }
    offsets.resize(num_vertices + 1, dsts.len() as u64);
    Ok(Csr { offsets, dsts, data })
}
