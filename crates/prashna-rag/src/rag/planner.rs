//! Agentic query planner.
//!
//! Turns one question into a retrieval plan via a single LLM call. Level 0
//! and credential-less configurations short-circuit to the degenerate
//! single-query plan; malformed model output degrades the same way. The
//! planner never fails a request.

use std::sync::Arc;

use crate::llm::{ApiProvider, FallbackResolver, GENERATION_FAILED_TAG};
use crate::types::QueryPlan;

use super::plan_extract::{extract_json_object, plan_from_value};

pub struct Planner {
    resolver: Arc<FallbackResolver>,
}

impl Planner {
    pub fn new(resolver: Arc<FallbackResolver>) -> Self {
        Self { resolver }
    }

    /// Produce a retrieval plan for `question` at the given planning level.
    pub async fn plan(
        &self,
        question: &str,
        level: u8,
        preferred: Option<ApiProvider>,
        model: Option<&str>,
    ) -> QueryPlan {
        if level == 0 || !self.resolver.has_generation_credential() {
            return QueryPlan::passthrough(question);
        }

        let prompt = build_planner_prompt(question, level);
        let raw = self.resolver.generate(&prompt, preferred, model).await;

        if raw.starts_with(GENERATION_FAILED_TAG) {
            tracing::warn!("Planner generation failed, using passthrough plan");
            return QueryPlan::passthrough(question);
        }

        let Some(value) = extract_json_object(&raw) else {
            tracing::warn!(
                response_chars = raw.len(),
                "No parsable plan object in model output, using passthrough plan"
            );
            return QueryPlan::passthrough(question);
        };

        let plan = plan_from_value(&value, question, level);
        tracing::debug!(
            need_retrieval = plan.need_retrieval,
            queries = ?plan.queries,
            follow_up = ?plan.follow_up,
            "Plan extracted"
        );
        plan
    }
}

fn build_planner_prompt(question: &str, level: u8) -> String {
    let max_queries = if level <= 1 { 2 } else { 3 };
    let mut prompt = format!(
        "You are a retrieval planner. Given a user question, decide whether \
         document retrieval is needed and which search queries to run.\n\n\
         Output a single JSON object with exactly these fields:\n\
         - \"need_retrieval\": boolean, false only for greetings/meta chat\n\
         - \"queries\": array of 1 to {} short search queries\n\
         - \"follow_up\": optional clarifying question, or null\n\
         - \"reason\": one sentence explaining the decision\n",
        max_queries
    );

    if level >= 3 {
        prompt.push_str(
            "- \"sub_questions\": array of at most 3 simpler questions whose \
             answers combine into the full answer (for multi-hop questions)\n",
        );
    }

    prompt.push_str(&format!(
        "\nOutput ONLY the JSON object, nothing else.\n\nQuestion: \"{}\"\nJSON:",
        question
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::config::{ProviderConfig, ProviderCredential};
    use crate::llm::{ClientFactory, GenerationConfig, LlmClient};

    struct CannedClient {
        response: String,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
            Ok(self.response.clone())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(anyhow!("not used"))
        }
    }

    struct CannedFactory {
        response: String,
        calls: Mutex<usize>,
    }

    impl ClientFactory for CannedFactory {
        fn client(
            &self,
            _provider: ApiProvider,
            _api_key: Option<&str>,
            _model: &str,
        ) -> Result<Arc<dyn LlmClient>> {
            *self.calls.lock().unwrap() += 1;
            Ok(Arc::new(CannedClient {
                response: self.response.clone(),
            }))
        }
    }

    fn planner_with_response(response: &str) -> (Planner, Arc<CannedFactory>) {
        let config = ProviderConfig {
            credentials: vec![ProviderCredential {
                provider: ApiProvider::OpenAI,
                api_key: Some("key".to_string()),
            }],
            default_embed_dimension: 4,
        };
        let factory = Arc::new(CannedFactory {
            response: response.to_string(),
            calls: Mutex::new(0),
        });
        let resolver = Arc::new(FallbackResolver::new(&config, factory.clone()));
        (Planner::new(resolver), factory)
    }

    fn credential_less_planner() -> (Planner, Arc<CannedFactory>) {
        let config = ProviderConfig {
            credentials: Vec::new(),
            default_embed_dimension: 4,
        };
        let factory = Arc::new(CannedFactory {
            response: String::new(),
            calls: Mutex::new(0),
        });
        let resolver = Arc::new(FallbackResolver::new(&config, factory.clone()));
        (Planner::new(resolver), factory)
    }

    #[tokio::test]
    async fn test_level_zero_short_circuits_without_llm() {
        let (planner, factory) = planner_with_response("{\"queries\":[\"never used\"]}");
        let plan = planner.plan("what is x", 0, None, None).await;
        assert_eq!(plan.queries, vec!["what is x"]);
        assert!(plan.need_retrieval);
        assert_eq!(*factory.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_credential_short_circuits_without_llm() {
        let (planner, factory) = credential_less_planner();
        let plan = planner.plan("what is x", 2, None, None).await;
        assert_eq!(plan.queries, vec!["what is x"]);
        assert_eq!(*factory.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_plan_extracted_from_commentary() {
        let (planner, _) = planner_with_response(
            "Sure, here is my plan:\n```json\n{\"need_retrieval\": true, \
             \"queries\": [\"alpha beta\", \"gamma\"], \"follow_up\": \
             \"want details on delta?\", \"reason\": \"two facets\"}\n``` \
             Let me know!",
        );
        let plan = planner.plan("what is x", 2, None, None).await;
        assert_eq!(plan.queries, vec!["alpha beta", "gamma"]);
        assert_eq!(plan.follow_up.as_deref(), Some("want details on delta?"));
    }

    #[tokio::test]
    async fn test_garbage_output_degrades_to_passthrough() {
        let (planner, _) = planner_with_response("I cannot help with that.");
        let plan = planner.plan("what is x", 2, None, None).await;
        assert_eq!(plan.queries, vec!["what is x"]);
        assert!(plan.need_retrieval);
    }
}
