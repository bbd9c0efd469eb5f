//! Top-level orchestration: plan, retrieve, augment, generate, trace.
//!
//! One `ask` call is a single stateless pass:
//! Plan -> Retrieve (concurrent fan-out) -> Supplement -> Graph Evidence ->
//! Generate -> Trace. Every stage degrades rather than fails; the only error
//! `ask` can return is caller-input validation.

use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{
    EngineConfig, MAX_AGENTIC_LEVEL, MAX_EVIDENCE_EDGES, MAX_EVIDENCE_NODES, MAX_PATH_HOPS,
    MAX_TOP_K,
};
use crate::graph::{self, render_graph_context, GraphStore};
use crate::llm::{format_answer_prompt, ApiProvider, FallbackResolver, GENERATION_FAILED_TAG};
use crate::rag::Planner;
use crate::search::{EmbeddingOptions, VectorIndex, VectorRetriever};
use crate::types::{
    AgenticTrace, Answer, GraphEvidence, GraphPath, QueryPlan, RetrievedPassage, TraceStep,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// Per-request options. Every numeric field is clamped server-side.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Total passage budget across all sub-queries.
    pub top_k: Option<usize>,
    /// Planning level 0..=3; 0 skips the LLM planner entirely.
    pub agentic_level: u8,
    /// Augment the answer context with knowledge-graph evidence.
    pub use_graph: bool,
    pub preferred_provider: Option<ApiProvider>,
    /// Generation model override, honored only by the primary provider.
    pub model: Option<String>,
    /// Embedding model override, honored only by the primary provider.
    pub embed_model: Option<String>,
    /// Overall per-request deadline for all network calls.
    pub timeout: Option<Duration>,
}

/// Request deadline shared by every network phase of one `ask` call.
struct Deadline(Option<tokio::time::Instant>);

impl Deadline {
    fn new(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| tokio::time::Instant::now() + t))
    }

    fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }
}

/// Run `fut` under the request deadline; on expiry, substitute `fallback`
/// so partial work already merged stays usable.
async fn bounded<T, F>(deadline: &Deadline, fut: F, fallback: impl FnOnce() -> T) -> T
where
    F: Future<Output = T>,
{
    match deadline.remaining() {
        None => fut.await,
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Request deadline exceeded, substituting fallback value");
                fallback()
            }
        },
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b.max(1))
}

fn dedup_key(passage: &RetrievedPassage, prefix_chars: usize) -> (String, String) {
    (
        passage.source.clone(),
        passage.text.chars().take(prefix_chars).collect(),
    )
}

/// Append `incoming` to `acc`, dropping passages whose dedup key was already
/// seen. First-seen order is preserved; no re-sorting by score.
fn merge_passages(
    acc: &mut Vec<RetrievedPassage>,
    seen: &mut HashSet<(String, String)>,
    incoming: Vec<RetrievedPassage>,
    prefix_chars: usize,
) {
    for passage in incoming {
        if seen.insert(dedup_key(&passage, prefix_chars)) {
            acc.push(passage);
        }
    }
}

/// Coordinates the full question-answering pipeline over injected backends.
/// Client lifecycle (connect/close) is owned by the host process.
pub struct AnswerEngine {
    resolver: Arc<FallbackResolver>,
    planner: Planner,
    retriever: VectorRetriever,
    graph: Arc<dyn GraphStore>,
    config: EngineConfig,
}

impl AnswerEngine {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<FallbackResolver>,
        index: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            planner: Planner::new(resolver.clone()),
            retriever: VectorRetriever::new(resolver.clone(), index),
            resolver,
            graph,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer `question`: plan, retrieve, augment, generate.
    ///
    /// Always returns a structurally valid `Answer`; degraded upstreams show
    /// up as empty context or a tagged failure answer, never as an Err. The
    /// only Err is rejection of invalid caller input.
    pub async fn ask(&self, question: &str, options: AskOptions) -> Result<Answer, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::EmptyQuestion);
        }

        let level = options.agentic_level.min(MAX_AGENTIC_LEVEL);
        let top_k = options
            .top_k
            .unwrap_or(self.config.retrieval.default_top_k)
            .clamp(1, MAX_TOP_K);
        let prefix_chars = self.config.retrieval.dedup_prefix_chars;
        let deadline = Deadline::new(options.timeout);
        let embed_options = EmbeddingOptions {
            preferred: options.preferred_provider,
            model: options.embed_model.clone(),
        };

        let request_id = Uuid::new_v4();
        tracing::info!(
            request_id = %request_id,
            level,
            top_k,
            use_graph = options.use_graph,
            "Handling question"
        );

        let mut trace = AgenticTrace::new(level);

        // Plan
        let plan = if level > 0 {
            let planned = bounded(
                &deadline,
                self.planner
                    .plan(question, level, options.preferred_provider, options.model.as_deref()),
                || QueryPlan::passthrough(question),
            )
            .await;
            trace.push(
                TraceStep::new("query planning")
                    .with_detail(planned.reason.clone().unwrap_or_else(|| {
                        format!("need_retrieval={}", planned.need_retrieval)
                    }))
                    .with_queries(planned.queries.clone()),
            );
            planned
        } else {
            QueryPlan::passthrough(question)
        };

        let mut passages: Vec<RetrievedPassage> = Vec::new();
        let mut follow_up = plan.follow_up.clone();
        let mut evidence: Option<GraphEvidence> = None;

        if !plan.need_retrieval {
            // Planner decided the question needs no documents; graph lookup
            // is skipped along with vector retrieval.
            trace.push(TraceStep::new("retrieval skipped").with_detail(
                plan.reason
                    .clone()
                    .unwrap_or_else(|| "planner marked retrieval unnecessary".to_string()),
            ));
        } else {
            let num_queries = plan.queries.len().max(1);
            let per_query_k = ceil_div(top_k, num_queries).max(1);

            // Concurrent fan-out, one retrieval per planned query. All tasks
            // settle before any merging happens, so the accumulator needs no
            // locking; a failed sub-query contributes an empty list.
            let searches = plan.queries.iter().map(|q| {
                bounded(
                    &deadline,
                    self.retriever.search(q, per_query_k, &embed_options),
                    Vec::new,
                )
            });
            let results = join_all(searches).await;

            let mut seen: HashSet<(String, String)> = HashSet::new();
            for (query, result) in plan.queries.iter().zip(results.into_iter()) {
                trace.push(
                    TraceStep::new("retrieval")
                        .with_queries(vec![query.clone()])
                        .with_retrieved(result.len()),
                );
                merge_passages(&mut passages, &mut seen, result, prefix_chars);
            }

            // Supplemental retrieval: one extra pass on the follow-up
            // question when the merged harvest came up thin. Consumed at
            // most once.
            if let Some(fq) = follow_up.clone() {
                let floor = std::cmp::max(3, ceil_div(per_query_k, 2));
                if passages.len() < floor {
                    let supplemental_k = std::cmp::max(2, ceil_div(per_query_k, 2));
                    let extra = bounded(
                        &deadline,
                        self.retriever.search(&fq, supplemental_k, &embed_options),
                        Vec::new,
                    )
                    .await;
                    trace.push(
                        TraceStep::new("supplemental retrieval")
                            .with_queries(vec![fq])
                            .with_retrieved(extra.len()),
                    );
                    merge_passages(&mut passages, &mut seen, extra, prefix_chars);
                    follow_up = None;
                }
            }

            if options.use_graph {
                let ev = graph::find_evidence(
                    self.graph.as_ref(),
                    question,
                    self.config.graph.max_nodes,
                    self.config.graph.max_edges,
                );
                trace.push(
                    TraceStep::new("graph evidence")
                        .with_graph_counts(ev.nodes.len(), ev.edges.len()),
                );
                evidence = Some(ev);
            }
        }

        // Generate from the original question, never a rewritten query.
        let passage_texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let graph_context = evidence
            .as_ref()
            .filter(|ev| !ev.edges.is_empty())
            .map(render_graph_context);
        let prompt = format_answer_prompt(question, &passage_texts, graph_context.as_deref());

        let mut answer = bounded(
            &deadline,
            self.resolver
                .generate(&prompt, options.preferred_provider, options.model.as_deref()),
            || {
                format!(
                    "{} request deadline exceeded before generation completed",
                    GENERATION_FAILED_TAG
                )
            },
        )
        .await;

        if let Some(fq) = follow_up {
            answer.push_str(&format!("\n\nSuggested follow-up: {}", fq));
        }

        trace.push(
            TraceStep::new("answer generation")
                .with_detail(format!(
                    "{} passages, graph context: {}",
                    passages.len(),
                    graph_context.is_some()
                ))
                .with_retrieved(passages.len()),
        );

        tracing::info!(
            request_id = %request_id,
            passages = passages.len(),
            graph_edges = evidence.as_ref().map(|e| e.edges.len()).unwrap_or(0),
            "Question answered"
        );

        Ok(Answer {
            answer,
            passages,
            graph_evidence: evidence,
            trace: (level > 0).then_some(trace),
        })
    }

    /// Standalone evidence lookup for inspection/debug UIs.
    pub fn find_evidence(&self, query: &str, max_nodes: usize, max_edges: usize) -> GraphEvidence {
        let max_nodes = max_nodes.clamp(1, MAX_EVIDENCE_NODES);
        let max_edges = max_edges.clamp(1, MAX_EVIDENCE_EDGES);
        graph::find_evidence(self.graph.as_ref(), query, max_nodes, max_edges)
    }

    /// Standalone shortest-path lookup for inspection/debug UIs.
    pub fn find_path(
        &self,
        from: &str,
        to: &str,
        max_hops: usize,
        allow_cross_doc: bool,
    ) -> GraphPath {
        graph::find_path(
            self.graph.as_ref(),
            from,
            to,
            max_hops.clamp(1, MAX_PATH_HOPS),
            allow_cross_doc,
            self.config.graph.max_path_edges,
        )
    }
}
