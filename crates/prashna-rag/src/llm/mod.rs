//! LLM Module - external API providers for text generation and embedding
//!
//! Concrete HTTP clients live in `external`; ordered multi-provider fallback
//! lives in `fallback`. Everything upstream talks to the `FallbackResolver`,
//! never to a provider directly.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod external;
pub mod fallback;

pub use external::{ExternalClient, HttpClientFactory};
pub use fallback::{FallbackResolver, GENERATION_FAILED_TAG};

/// External API providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    Anthropic,
    Google,
    Ollama,
}

impl ApiProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google",
            Self::Ollama => "Ollama",
        }
    }

    /// Ollama is a local daemon and authenticates with nothing.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    pub fn default_generation_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::Google => "gemini-2.0-flash",
            Self::Ollama => "llama3.2",
        }
    }

    /// Providers without an embedding endpoint return None and are excluded
    /// from the embedding fallback chain.
    pub fn default_embedding_model(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("text-embedding-3-small"),
            Self::Anthropic => None,
            Self::Google => Some("text-embedding-004"),
            Self::Ollama => Some("nomic-embed-text"),
        }
    }

    pub fn supports_embedding(&self) -> bool {
        self.default_embedding_model().is_some()
    }
}

/// Generation parameters passed through to every provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.3,
            top_p: 0.95,
        }
    }
}

/// One provider client, bound to a single (provider, key, model) triple.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Builds clients per provider. Swapped for a scripted factory in tests so
/// fallback behavior is verifiable without network access.
pub trait ClientFactory: Send + Sync {
    fn client(
        &self,
        provider: ApiProvider,
        api_key: Option<&str>,
        model: &str,
    ) -> Result<Arc<dyn LlmClient>>;
}

/// Assemble the final answer prompt from retrieved passages, the optional
/// graph-evidence block, and the user's original (non-rewritten) question.
pub fn format_answer_prompt(
    question: &str,
    passages: &[String],
    graph_context: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You are a careful assistant answering from the provided context. \
         Ground every claim in the context below; if the context does not \
         contain the answer, say so plainly instead of guessing.\n",
    );

    if passages.is_empty() {
        prompt.push_str("\nNo documents were retrieved for this question.\n");
    } else {
        prompt.push_str("\n## Context\n");
        for (i, passage) in passages.iter().enumerate() {
            prompt.push_str(&format!("\n[{}] {}\n", i + 1, passage));
        }
    }

    if let Some(graph) = graph_context {
        prompt.push('\n');
        prompt.push_str(graph);
        prompt.push('\n');
    }

    prompt.push_str(&format!("\n## Question\n{}\n\nAnswer:", question));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_support() {
        assert!(ApiProvider::OpenAI.supports_embedding());
        assert!(!ApiProvider::Anthropic.supports_embedding());
        assert!(!ApiProvider::Ollama.requires_api_key());
    }

    #[test]
    fn test_answer_prompt_contains_question_and_passages() {
        let prompt = format_answer_prompt(
            "What is the refund policy?",
            &["Refunds are issued within 30 days.".to_string()],
            Some("Knowledge graph facts:\npolicy --[covers]--> refunds"),
        );
        assert!(prompt.contains("What is the refund policy?"));
        assert!(prompt.contains("[1] Refunds are issued within 30 days."));
        assert!(prompt.contains("policy --[covers]--> refunds"));
    }

    #[test]
    fn test_answer_prompt_without_context() {
        let prompt = format_answer_prompt("hello?", &[], None);
        assert!(prompt.contains("No documents were retrieved"));
    }
}
