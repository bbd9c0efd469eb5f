//! Bounded BFS shortest-path search between two named graph nodes.
//!
//! Edges are traversed undirected. Each queue entry carries a full copy of
//! its partial path; with hop counts capped at 6 and the edge list capped at
//! 5000 this stays cheap and avoids parent-pointer bookkeeping.

use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::MAX_PATH_HOPS;
use crate::types::{GraphEdge, GraphNode, GraphPath};

use super::GraphStore;

const NO_PATH: &str = "no path";
const NO_PATH_CROSS_DOC: &str = "no path (same-doc constraint failed)";

/// Find the minimum-edge-count path between `from` and `to`.
///
/// With `allow_cross_doc = false` both endpoints must exist and share a
/// `doc_id`; otherwise the search is refused up front with a "no path"
/// result. Store errors also degrade to "no path", never an error.
pub fn find_path(
    store: &dyn GraphStore,
    from: &str,
    to: &str,
    max_hops: usize,
    allow_cross_doc: bool,
    max_edges: usize,
) -> GraphPath {
    let max_hops = max_hops.clamp(1, MAX_PATH_HOPS);

    let doc_filter = if allow_cross_doc {
        None
    } else {
        let (from_node, to_node) = match (store.node(from), store.node(to)) {
            (Ok(f), Ok(t)) => (f, t),
            _ => return GraphPath::not_found(NO_PATH),
        };
        let (Some(from_node), Some(to_node)) = (from_node, to_node) else {
            return GraphPath::not_found(NO_PATH_CROSS_DOC);
        };
        match (&from_node.doc_id, &to_node.doc_id) {
            (Some(a), Some(b)) if a == b => Some(a.clone()),
            _ => return GraphPath::not_found(NO_PATH_CROSS_DOC),
        }
    };

    let edge_list = match store.edges(doc_filter.as_deref(), max_edges) {
        Ok(edges) => edges,
        Err(e) => {
            tracing::warn!(error = %e, "Edge load failed during path search");
            return GraphPath::not_found(NO_PATH);
        }
    };

    // Adjacency over node ids; edge weight indexes back into edge_list.
    let mut graph: UnGraph<String, usize> = UnGraph::new_undirected();
    let mut indices: HashMap<String, NodeIndex> = HashMap::new();
    let mut index_of = |graph: &mut UnGraph<String, usize>, id: &str| -> NodeIndex {
        if let Some(&idx) = indices.get(id) {
            return idx;
        }
        let idx = graph.add_node(id.to_string());
        indices.insert(id.to_string(), idx);
        idx
    };

    for (i, edge) in edge_list.iter().enumerate() {
        let s = index_of(&mut graph, &edge.source);
        let t = index_of(&mut graph, &edge.target);
        graph.add_edge(s, t, i);
    }

    let (Some(&start), Some(&target)) = (indices.get(from), indices.get(to)) else {
        return GraphPath::not_found(NO_PATH);
    };

    // BFS with copy-on-enqueue paths; visited is marked at enqueue time so a
    // node is never queued twice.
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<(NodeIndex, Vec<NodeIndex>, Vec<usize>)> = VecDeque::new();

    visited.insert(start);
    queue.push_back((start, vec![start], Vec::new()));

    while let Some((node, path_nodes, path_edges)) = queue.pop_front() {
        if node == target {
            return build_path(store, &graph, &edge_list, &path_nodes, &path_edges);
        }

        // Abandon the branch once extending it would exceed the hop budget.
        if path_edges.len() >= max_hops {
            continue;
        }

        let mut neighbors = graph.neighbors(node).detach();
        while let Some((edge_idx, neighbor)) = neighbors.next(&graph) {
            if visited.contains(&neighbor) {
                continue;
            }
            visited.insert(neighbor);

            let mut next_nodes = path_nodes.clone();
            next_nodes.push(neighbor);
            let mut next_edges = path_edges.clone();
            next_edges.push(graph[edge_idx]);
            queue.push_back((neighbor, next_nodes, next_edges));
        }
    }

    GraphPath::not_found(NO_PATH)
}

fn build_path(
    store: &dyn GraphStore,
    graph: &UnGraph<String, usize>,
    edge_list: &[GraphEdge],
    path_nodes: &[NodeIndex],
    path_edges: &[usize],
) -> GraphPath {
    let ids: Vec<String> = path_nodes.iter().map(|&idx| graph[idx].clone()).collect();

    // Hydrate full node records; endpoints only known from edges get a
    // minimal placeholder so the path is always renderable.
    let nodes: Vec<GraphNode> = ids
        .iter()
        .map(|id| match store.node(id) {
            Ok(Some(node)) => node,
            _ => GraphNode {
                id: id.clone(),
                label: id.clone(),
                node_type: "unknown".to_string(),
                doc_id: None,
                section_id: None,
                chunk_id: None,
            },
        })
        .collect();

    let edges: Vec<GraphEdge> = path_edges.iter().map(|&i| edge_list[i].clone()).collect();
    let summary = ids.join(" -> ");

    GraphPath {
        nodes,
        edges,
        summary,
        found: true,
    }
}
