#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shardgraph::{
    BuildOptions, CounterMetrics, EdgeListParser, GraphBuilder, HostId, InputSource, MirrorGraph,
    SyncMode, TopologyId, VertexRef, VertexToken,
};

fn random_graph(
    seed: u64,
    hosts: usize,
    n: u64,
    m: usize,
    metrics: Option<Arc<CounterMetrics>>,
) -> (MirrorGraph<u64, ()>, Vec<(u64, u64)>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let edges: Vec<(u64, u64)> = (0..m)
        .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
        .collect();
    let text: String = edges.iter().map(|(s, d)| format!("{s} {d}\n")).collect();
    let mut options = BuildOptions::new(hosts).workers_per_host(2);
    if let Some(metrics) = metrics {
        options = options.metrics(metrics);
    }
    let graph = GraphBuilder::new(options)
        .input(InputSource::memory("graph.el", text))
        .build(&EdgeListParser::new(n), |_, _| 0u64, |_| ())
        .expect("build");
    (graph, edges)
}

/// Every host counts the edges landing on its local slots.
fn count_local_in_degrees(graph: &mut MirrorGraph<u64, ()>) {
    for host in HostId::all(graph.num_hosts()) {
        let targets: Vec<VertexRef> = graph
            .local_master_range(host)
            .flat_map(|tid| {
                let v = VertexRef::new(host, TopologyId(tid));
                graph.edges(v).map(|e| graph.edge_dst(e)).collect::<Vec<_>>()
            })
            .collect();
        for dst in targets {
            *graph.data_mut(dst) += 1;
        }
    }
}

fn in_degrees(edges: &[(u64, u64)]) -> HashMap<u64, u64> {
    let mut out = HashMap::new();
    for (_, d) in edges {
        *out.entry(*d).or_insert(0) += 1;
    }
    out
}

fn assert_master_in_degrees(graph: &MirrorGraph<u64, ()>, edges: &[(u64, u64)], n: u64) {
    let expected = in_degrees(edges);
    for token in 0..n {
        let v = graph.topology_id(VertexToken(token)).unwrap();
        assert_eq!(
            *graph.data(v),
            expected.get(&token).copied().unwrap_or(0),
            "in-degree of {token}"
        );
    }
}

#[test]
fn sync_completes_partial_in_degrees() {
    let n = 250;
    let (mut graph, edges) = random_graph(1, 4, n, 3_000, None);
    count_local_in_degrees(&mut graph);
    graph
        .sync(SyncMode::All, |mirror, master| *master += *mirror)
        .unwrap();
    assert_master_in_degrees(&graph, &edges, n);
}

#[test]
fn reduce_completes_partial_in_degrees() {
    let n = 250;
    let (mut graph, edges) = random_graph(1, 4, n, 3_000, None);
    count_local_in_degrees(&mut graph);
    graph
        .reduce(SyncMode::All, |mirror, master| *master += *mirror)
        .unwrap();
    assert_master_in_degrees(&graph, &edges, n);
}

#[test]
fn broadcast_makes_replicas_agree() {
    let n = 180;
    let (mut graph, _) = random_graph(9, 3, n, 1_200, None);
    for host in HostId::all(graph.num_hosts()) {
        for tid in graph.local_master_range(host) {
            let v = VertexRef::new(host, TopologyId(tid));
            let token = graph.token_id(v).0;
            graph.set_data(v, token * 10);
        }
    }
    let pushed = graph
        .broadcast(SyncMode::All, |master, mirror| *mirror = *master)
        .unwrap();
    assert_eq!(pushed, graph.report().total_mirrors());
    for host in HostId::all(graph.num_hosts()) {
        for tid in graph.local_mirror_range(host) {
            let mirror = VertexRef::new(host, TopologyId(tid));
            assert_eq!(*graph.data(mirror), graph.token_id(mirror).0 * 10);
        }
    }
}

#[test]
fn dirty_broadcast_touches_only_changed_masters() {
    let n = 100;
    let (mut graph, _) = random_graph(4, 2, n, 800, None);
    let changed = (0..n)
        .map(VertexToken)
        .find(|t| {
            let owner = graph.physical_host_id(*t);
            HostId::all(graph.num_hosts()).any(|h| h != owner && graph.is_local(h, *t))
        })
        .expect("some vertex is mirrored");
    let master = graph.topology_id(changed).unwrap();
    graph.set_data(master, 77);
    graph.mark_dirty(master);

    let pushed = graph
        .broadcast(SyncMode::DirtyOnly, |master, mirror| *mirror = *master)
        .unwrap();
    let replicas = graph.master_to_mirror(master.host);
    let expected = replicas
        .iter()
        .flatten()
        .filter(|e| e.master == master.tid)
        .count() as u64;
    assert_eq!(pushed, expected);
    for host in HostId::all(graph.num_hosts()) {
        for tid in graph.local_mirror_range(host) {
            let mirror = VertexRef::new(host, TopologyId(tid));
            let want = if graph.token_id(mirror) == changed { 77 } else { 0 };
            assert_eq!(*graph.data(mirror), want);
        }
    }
}

#[test]
fn merges_are_counted() {
    let metrics = Arc::new(CounterMetrics::default());
    let (mut graph, _) = random_graph(3, 3, 90, 500, Some(metrics.clone()));
    let mirrors = graph.report().total_mirrors();
    assert_eq!(metrics.snapshot().mirrors_created, mirrors);
    graph.sync(SyncMode::All, |_, _| {}).unwrap();
    graph.reduce(SyncMode::All, |_, _| {}).unwrap();
    assert_eq!(metrics.snapshot().merges_applied, 2 * mirrors);
}

#[test]
fn dirty_bits_survive_sync_until_cleared() {
    let (mut graph, _) = random_graph(6, 2, 60, 300, None);
    let v = graph.topology_id(VertexToken(0)).unwrap();
    graph.mark_dirty(v);
    graph.sync(SyncMode::DirtyOnly, |mirror, master| *master += *mirror).unwrap();
    assert!(graph.is_dirty(v));
    graph.clear_dirty();
    assert!(!graph.is_dirty(v));
    graph.mark_all_dirty();
    assert!(graph.is_dirty(v));
}

#[test]
fn dirty_sync_adds_each_mirror_value_to_its_master() {
    let n = 180;
    let hosts = 3;
    let (mut graph, _) = random_graph(29, hosts, n, 1_400, None);
    for host in HostId::all(hosts) {
        for tid in graph.local_master_range(host) {
            let v = VertexRef::new(host, TopologyId(tid));
            let original = graph.token_id(v).0 * 10;
            graph.set_data(v, original);
        }
        for tid in graph.local_mirror_range(host) {
            graph.set_data(VertexRef::new(host, TopologyId(tid)), 3);
        }
    }
    graph.mark_all_dirty();

    let merges = graph
        .sync(SyncMode::DirtyOnly, |mirror, master| *master += *mirror)
        .unwrap();
    assert_eq!(merges, graph.report().total_mirrors());
    assert!(merges > 0);

    for token in (0..n).map(VertexToken) {
        let master = graph.topology_id(token).unwrap();
        let mirror_count = HostId::all(hosts)
            .filter(|h| *h != master.host && graph.is_local(*h, token))
            .count() as u64;
        assert_eq!(*graph.data(master), token.0 * 10 + 3 * mirror_count, "master of {token:?}");
    }
}
