//! prashna-rag: resilient question answering over vector and graph
//! retrieval with multi-provider LLM fallback.
//!
//! The pipeline is a single stateless pass per question: an agentic planner
//! decomposes the question into retrieval sub-queries, vector retrieval fans
//! out concurrently and merges with dedup, knowledge-graph evidence
//! supplements the context, and the fallback resolver generates the final
//! answer. Any single upstream provider being unavailable degrades quality,
//! never availability.

pub mod answer_engine;
pub mod config;
pub mod graph;
pub mod llm;
pub mod rag;
pub mod search;
pub mod types;

// Re-export primary types for convenience
pub use answer_engine::{AnswerEngine, AskOptions, EngineError};
pub use config::EngineConfig;
pub use graph::{GraphStore, InMemoryGraphStore};
pub use llm::{ApiProvider, FallbackResolver, GenerationConfig, GENERATION_FAILED_TAG};
pub use search::{InMemoryVectorIndex, VectorIndex, VectorMatch};
pub use types::{
    AgenticTrace, Answer, GraphEdge, GraphEvidence, GraphNode, GraphPath, QueryPlan,
    RetrievedPassage, TraceStep,
};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
