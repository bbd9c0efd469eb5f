//! Knowledge-graph read access plus the evidence matcher and path finder.
//!
//! Graph records are produced by the ingestion pipeline and are read-only
//! here. Hosts hand the engine any `GraphStore` implementation; the bundled
//! in-memory store serves tests and small deployments.

use anyhow::Result;
use std::collections::HashMap;

use crate::types::{GraphEdge, GraphNode};

pub mod evidence;
pub mod pathfind;

pub use evidence::{find_evidence, render_graph_context};
pub use pathfind::find_path;

/// Read-only access to the persisted knowledge graph.
pub trait GraphStore: Send + Sync {
    /// Nodes whose label satisfies the predicate, up to `limit`.
    fn nodes_where_label(
        &self,
        predicate: &dyn Fn(&str) -> bool,
        limit: usize,
    ) -> Result<Vec<GraphNode>>;

    /// Edges whose source OR target is one of `node_ids`, up to `limit`.
    fn edges_touching(&self, node_ids: &[String], limit: usize) -> Result<Vec<GraphEdge>>;

    fn nodes_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>>;

    fn node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Edge list for path finding, optionally restricted to one document.
    fn edges(&self, doc_id: Option<&str>, limit: usize) -> Result<Vec<GraphEdge>>;
}

/// In-memory graph store. Insertion order of edges is preserved.
#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: HashMap<String, GraphNode>,
    node_order: Vec<String>,
    edges: Vec<GraphEdge>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) {
        if !self.nodes.contains_key(&node.id) {
            self.node_order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Both endpoints must already exist; dangling edges are dropped.
    pub fn add_edge(&mut self, edge: GraphEdge) {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            tracing::debug!(
                source = %edge.source,
                target = %edge.target,
                "Dropping edge with unknown endpoint"
            );
            return;
        }
        self.edges.push(edge);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn nodes_where_label(
        &self,
        predicate: &dyn Fn(&str) -> bool,
        limit: usize,
    ) -> Result<Vec<GraphNode>> {
        Ok(self
            .node_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| predicate(&n.label))
            .take(limit)
            .cloned()
            .collect())
    }

    fn edges_touching(&self, node_ids: &[String], limit: usize) -> Result<Vec<GraphEdge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| node_ids.contains(&e.source) || node_ids.contains(&e.target))
            .take(limit)
            .cloned()
            .collect())
    }

    fn nodes_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        Ok(ids.iter().filter_map(|id| self.nodes.get(id)).cloned().collect())
    }

    fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self.nodes.get(id).cloned())
    }

    fn edges(&self, doc_id: Option<&str>, limit: usize) -> Result<Vec<GraphEdge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| match doc_id {
                Some(doc) => e.doc_id.as_deref() == Some(doc),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
