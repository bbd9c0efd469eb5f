//! Vector retrieval - embedding resolution plus top-K similarity search.
//!
//! The index itself is a dependency-injected handle owned by the host
//! process; this module only resolves query vectors and maps raw matches
//! into passages. Retrieval degradation never fails a request: any index
//! or transport error collapses to an empty result list.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{ApiProvider, FallbackResolver};
use crate::types::RetrievedPassage;

/// A raw similarity match as produced by the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub score: f32,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Read capability of the vector index, supplied by the host.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;
}

/// Embedding resolution options forwarded to the fallback resolver.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOptions {
    pub preferred: Option<ApiProvider>,
    pub model: Option<String>,
}

/// Maps query strings to scored passages via embed + similarity search.
pub struct VectorRetriever {
    resolver: Arc<FallbackResolver>,
    index: Arc<dyn VectorIndex>,
}

impl VectorRetriever {
    pub fn new(resolver: Arc<FallbackResolver>, index: Arc<dyn VectorIndex>) -> Self {
        Self { resolver, index }
    }

    /// Search the index for `top_k` passages similar to `query`.
    ///
    /// Errors from the index degrade to an empty list; the embedding side
    /// already degrades to the zero-vector sentinel inside the resolver.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        options: &EmbeddingOptions,
    ) -> Vec<RetrievedPassage> {
        let vector = self
            .resolver
            .embed(query, options.preferred, options.model.as_deref())
            .await;

        match self.index.query(&vector, top_k).await {
            Ok(matches) => {
                tracing::debug!(query = query, hits = matches.len(), "Vector search complete");
                matches
                    .into_iter()
                    .map(|m| RetrievedPassage {
                        score: m.score,
                        text: m.text,
                        source: m.source,
                        page: m.page,
                        metadata: m.metadata,
                    })
                    .collect()
            }
            Err(e) => {
                tracing::warn!(query = query, error = %e, "Vector search failed, degrading to empty result");
                Vec::new()
            }
        }
    }
}

/// In-memory cosine-similarity index for tests and small host deployments.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    rows: Vec<IndexRow>,
}

struct IndexRow {
    vector: Vec<f32>,
    text: String,
    source: String,
    page: Option<u32>,
    metadata: HashMap<String, String>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        vector: Vec<f32>,
        text: &str,
        source: &str,
        page: Option<u32>,
        metadata: HashMap<String, String>,
    ) {
        self.rows.push(IndexRow {
            vector,
            text: text.to_string(),
            source: source.to_string(),
            page,
            metadata,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let mut scored: Vec<VectorMatch> = self
            .rows
            .iter()
            .map(|row| VectorMatch {
                score: cosine_similarity(vector, &row.vector),
                text: row.text.clone(),
                source: row.source.clone(),
                page: row.page,
                metadata: row.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::config::ProviderConfig;
    use crate::llm::HttpClientFactory;

    /// Resolver with no credentials: embed always yields the zero sentinel.
    fn offline_resolver(dimension: usize) -> Arc<FallbackResolver> {
        let config = ProviderConfig {
            credentials: Vec::new(),
            default_embed_dimension: dimension,
        };
        Arc::new(FallbackResolver::new(&config, Arc::new(HttpClientFactory)))
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<VectorMatch>> {
            Err(anyhow!("index unavailable"))
        }
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_empty() {
        let retriever = VectorRetriever::new(offline_resolver(4), Arc::new(FailingIndex));
        let passages = retriever
            .search("anything", 5, &EmbeddingOptions::default())
            .await;
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_index_orders_by_similarity() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(vec![1.0, 0.0], "exact", "doc-a", Some(1), HashMap::new());
        index.insert(vec![0.0, 1.0], "orthogonal", "doc-b", None, HashMap::new());
        index.insert(vec![0.7, 0.7], "diagonal", "doc-c", None, HashMap::new());

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "exact");
        assert_eq!(hits[1].text, "diagonal");
    }

    #[tokio::test]
    async fn test_search_maps_matches_to_passages() {
        let mut index = InMemoryVectorIndex::new();
        let mut meta = HashMap::new();
        meta.insert("section".to_string(), "intro".to_string());
        // Zero query vector scores 0 against everything but rows still return.
        index.insert(vec![1.0, 0.0], "hello world", "doc-a", Some(3), meta);

        let retriever = VectorRetriever::new(offline_resolver(2), Arc::new(index));
        let passages = retriever
            .search("hello", 5, &EmbeddingOptions::default())
            .await;

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].source, "doc-a");
        assert_eq!(passages[0].page, Some(3));
        assert_eq!(passages[0].metadata.get("section").unwrap(), "intro");
    }
}
