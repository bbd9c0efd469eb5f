//! Evidence subgraph construction via token matching on node labels.
//!
//! Matching is OR across tokens, not AND: a multi-word query broadens the
//! match set. Recall over precision, since graph facts only supplement the
//! retrieved passages.

use std::collections::HashSet;

use crate::types::{GraphEdge, GraphEvidence};

use super::GraphStore;

/// Tokens shorter than this are discarded before matching.
const MIN_TOKEN_CHARS: usize = 2;

fn render_triple(edge: &GraphEdge) -> String {
    format!("{} --[{}]--> {}", edge.source, edge.relation, edge.target)
}

/// Build an evidence subgraph for `query`.
///
/// Store errors are recovered locally: the result degrades to whatever was
/// gathered before the failure (possibly empty), never an error.
pub fn find_evidence(
    store: &dyn GraphStore,
    query: &str,
    max_nodes: usize,
    max_edges: usize,
) -> GraphEvidence {
    let tokens: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(|t| t.to_lowercase())
        .collect();

    if tokens.is_empty() {
        return GraphEvidence::default();
    }

    let predicate = |label: &str| {
        let label = label.to_lowercase();
        tokens.iter().any(|t| label.contains(t.as_str()))
    };

    let mut nodes = match store.nodes_where_label(&predicate, max_nodes) {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "Graph node matching failed, returning empty evidence");
            return GraphEvidence::default();
        }
    };

    if nodes.is_empty() {
        return GraphEvidence::default();
    }

    let matched_node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

    let edges = match store.edges_touching(&matched_node_ids, max_edges) {
        Ok(edges) => edges,
        Err(e) => {
            tracing::warn!(error = %e, "Graph edge lookup failed, returning matched nodes only");
            return GraphEvidence {
                nodes,
                edges: Vec::new(),
                triples: Vec::new(),
                matched_node_ids,
            };
        }
    };

    // Hydrate endpoints referenced by edges but not matched directly, so the
    // node list is edge-complete. Bounded at max_nodes * 2 total nodes.
    let mut known: HashSet<String> = matched_node_ids.iter().cloned().collect();
    let mut missing: Vec<String> = Vec::new();
    for edge in &edges {
        for id in [&edge.source, &edge.target] {
            if known.insert(id.clone()) {
                missing.push(id.clone());
            }
        }
    }
    let hydration_budget = (max_nodes * 2).saturating_sub(nodes.len());
    missing.truncate(hydration_budget);

    if !missing.is_empty() {
        match store.nodes_by_ids(&missing) {
            Ok(hydrated) => nodes.extend(hydrated),
            Err(e) => {
                tracing::warn!(error = %e, "Endpoint hydration failed, evidence nodes incomplete");
            }
        }
    }

    let triples = edges.iter().map(render_triple).collect();

    GraphEvidence {
        nodes,
        edges,
        triples,
        matched_node_ids,
    }
}

/// Render evidence as a short explanatory block for the answer prompt.
pub fn render_graph_context(evidence: &GraphEvidence) -> String {
    let mut block = String::from("## Knowledge graph facts\n");
    for triple in &evidence.triples {
        block.push_str("- ");
        block.push_str(triple);
        block.push('\n');
    }
    block
}
