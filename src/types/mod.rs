//! Identifier newtypes shared by every construction phase, plus the crate error.

use std::fmt;

mod error;

pub use error::{GraphError, LineError, Result};

/// Externally meaningful vertex identifier taken from the input data.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct VertexToken(pub u64);

/// One of the fixed physical partitions of the graph.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct HostId(pub u32);

/// Load-balancing bucket that only exists while the graph is being built.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct VirtualHostId(pub u32);

/// Host-local dense vertex index.
///
/// Masters occupy `[0, num_masters)` and mirrors follow them. The value is
/// meaningless on any other host; pair it with a [`HostId`] through
/// [`VertexRef`] before handing it across host boundaries.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct TopologyId(pub u64);

/// Globally meaningful `(host, local index)` reference to a vertex slot.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VertexRef {
    /// Host holding the slot.
    pub host: HostId,
    /// Slot index on that host.
    pub tid: TopologyId,
}

/// Cursor into one host's compressed adjacency arrays.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeHandle {
    /// Host storing the edge.
    pub host: HostId,
    /// Position in that host's destination array.
    pub index: u64,
}

impl VertexToken {
    /// Virtual host owning this token for a given virtual host count.
    #[inline]
    pub fn virtual_host(self, num_virtual_hosts: usize) -> VirtualHostId {
        VirtualHostId((self.0 % num_virtual_hosts as u64) as u32)
    }
}

impl HostId {
    /// Position of the host in per-host arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates `HostId(0)..HostId(count)`.
    pub fn all(count: usize) -> impl Iterator<Item = HostId> + Clone {
        (0..count as u32).map(HostId)
    }
}

impl VirtualHostId {
    /// Position in per-virtual-host arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TopologyId {
    /// Position in per-host slot arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VertexRef {
    /// Slot `tid` on `host`.
    pub const fn new(host: HostId, tid: TopologyId) -> Self {
        Self { host, tid }
    }
}

impl From<u64> for VertexToken {
    fn from(value: u64) -> Self {
        VertexToken(value)
    }
}

impl From<VertexToken> for u64 {
    fn from(value: VertexToken) -> Self {
        value.0
    }
}

impl From<usize> for TopologyId {
    fn from(value: usize) -> Self {
        TopologyId(value as u64)
    }
}

impl fmt::Display for VertexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host{}", self.0)
    }
}

impl fmt::Display for VirtualHostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vhost{}", self.0)
    }
}

impl fmt::Display for TopologyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VertexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.tid)
    }
}
