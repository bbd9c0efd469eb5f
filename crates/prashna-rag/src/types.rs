use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scored passage returned by vector retrieval.
///
/// Immutable once created. Merged multi-query result lists preserve
/// first-seen order, NOT descending score order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub score: f32,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Retrieval plan produced by the agentic planner for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub need_retrieval: bool,
    /// 1..=4 unique retrieval queries, first-seen order.
    pub queries: Vec<String>,
    /// Optional follow-up question; consumed at most once by the orchestrator.
    pub follow_up: Option<String>,
    pub reason: Option<String>,
    /// Multi-hop sub-questions, populated only at planning level 3.
    #[serde(default)]
    pub sub_questions: Vec<String>,
}

impl QueryPlan {
    /// Degenerate plan: retrieve with the question as-is. Used at level 0,
    /// when no generation credential exists, or when plan extraction fails.
    pub fn passthrough(question: &str) -> Self {
        Self {
            need_retrieval: true,
            queries: vec![question.to_string()],
            follow_up: None,
            reason: None,
            sub_questions: Vec::new(),
        }
    }
}

/// A node in the externally ingested knowledge graph. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable natural-language key, also used as edge endpoint reference.
    pub id: String,
    pub label: String,
    pub node_type: String,
    pub doc_id: Option<String>,
    pub section_id: Option<String>,
    pub chunk_id: Option<String>,
}

/// A directed relation between two graph nodes. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub doc_id: Option<String>,
    pub section_id: Option<String>,
    pub chunk_id: Option<String>,
}

/// Evidence subgraph judged relevant to a query via label matching.
///
/// Invariant: every node referenced by an edge in `edges` is present in
/// `nodes`, hydrated from the store if it was not matched directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphEvidence {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Human-readable `"<source> --[<relation>]--> <target>"` strings.
    pub triples: Vec<String>,
    pub matched_node_ids: Vec<String>,
}

impl GraphEvidence {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Result of a bounded BFS shortest-path search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Node-id chain joined by " -> ", or a "no path" marker.
    pub summary: String,
    pub found: bool,
}

impl GraphPath {
    pub fn not_found(reason: &str) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            summary: reason.to_string(),
            found: false,
        }
    }
}

/// One step in the orchestration trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_edges: Option<usize>,
}

impl TraceStep {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            detail: None,
            queries: None,
            retrieved: None,
            graph_nodes: None,
            graph_edges: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = Some(queries);
        self
    }

    pub fn with_retrieved(mut self, count: usize) -> Self {
        self.retrieved = Some(count);
        self
    }

    pub fn with_graph_counts(mut self, nodes: usize, edges: usize) -> Self {
        self.graph_nodes = Some(nodes);
        self.graph_edges = Some(edges);
        self
    }
}

/// Ordered, append-only log of orchestration steps. Observability only,
/// never control flow; never mutated after the response is assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticTrace {
    /// Planning level 0..=3 this request ran at.
    pub level: u8,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<TraceStep>,
}

impl AgenticTrace {
    pub fn new(level: u8) -> Self {
        Self {
            level,
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }
}

/// Final pipeline output returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub passages: Vec<RetrievedPassage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_evidence: Option<GraphEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgenticTrace>,
}
