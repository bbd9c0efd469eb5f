//! Ordered multi-provider fallback for generation and embedding.
//!
//! A single provider's failure is never fatal: candidates are tried in
//! priority order and the first success wins. Total exhaustion degrades to a
//! tagged failure string (generation) or a zero-vector sentinel (embedding)
//! so the pipeline always has a structurally valid value to work with.

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderCredential};

use super::{ApiProvider, ClientFactory, GenerationConfig, HttpClientFactory};

/// Prefix of the failure string `generate` returns on total exhaustion.
/// Callers render it as a degraded message; it is never a panic or an Err.
pub const GENERATION_FAILED_TAG: &str = "[generation failed]";

/// Fixed fallback priority when the caller expresses no preference.
const GENERATION_PRIORITY: [ApiProvider; 4] = [
    ApiProvider::OpenAI,
    ApiProvider::Anthropic,
    ApiProvider::Google,
    ApiProvider::Ollama,
];

/// Embedding chain only contains providers with an embedding endpoint.
const EMBEDDING_PRIORITY: [ApiProvider; 3] = [
    ApiProvider::OpenAI,
    ApiProvider::Google,
    ApiProvider::Ollama,
];

/// Build the candidate order: preferred provider first (only when it has a
/// credential), then the fixed priority, each provider at most once.
fn candidate_order(
    preferred: Option<ApiProvider>,
    priority: &[ApiProvider],
    has_credential: impl Fn(ApiProvider) -> bool,
) -> Vec<ApiProvider> {
    let mut order = Vec::with_capacity(priority.len() + 1);
    if let Some(p) = preferred {
        if has_credential(p) {
            order.push(p);
        }
    }
    for &p in priority {
        if !order.contains(&p) {
            order.push(p);
        }
    }
    order
}

/// Resolves generation and embedding calls across the configured providers.
pub struct FallbackResolver {
    credentials: Vec<ProviderCredential>,
    factory: Arc<dyn ClientFactory>,
    generation: GenerationConfig,
    default_embed_dimension: usize,
}

impl FallbackResolver {
    pub fn new(config: &ProviderConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            credentials: config.credentials.clone(),
            factory,
            generation: GenerationConfig::default(),
            default_embed_dimension: config.default_embed_dimension,
        }
    }

    /// Production resolver backed by the HTTP client factory.
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config, Arc::new(HttpClientFactory))
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    fn credential(&self, provider: ApiProvider) -> Option<&ProviderCredential> {
        self.credentials.iter().find(|c| c.provider == provider)
    }

    fn has_credential(&self, provider: ApiProvider) -> bool {
        self.credential(provider).is_some_and(|c| c.is_usable())
    }

    /// Whether any provider could serve a generation call. The planner uses
    /// this to short-circuit to the degenerate plan without an LLM round trip.
    pub fn has_generation_credential(&self) -> bool {
        GENERATION_PRIORITY.iter().any(|&p| self.has_credential(p))
    }

    pub fn default_embed_dimension(&self) -> usize {
        self.default_embed_dimension
    }

    /// Generate text, trying providers in fallback order.
    ///
    /// The caller's `model` override is honored only for the primary (first
    /// attempted) candidate; fallback candidates use their own default models
    /// to avoid cross-provider model-name mismatches.
    ///
    /// On total exhaustion returns a `GENERATION_FAILED_TAG`-prefixed string,
    /// never an error.
    pub async fn generate(
        &self,
        prompt: &str,
        preferred: Option<ApiProvider>,
        model: Option<&str>,
    ) -> String {
        let candidates =
            candidate_order(preferred, &GENERATION_PRIORITY, |p| self.has_credential(p));

        let mut last_error: Option<anyhow::Error> = None;
        let mut attempted = 0usize;

        for provider in candidates {
            let Some(cred) = self.credential(provider).filter(|c| c.is_usable()) else {
                tracing::debug!(provider = provider.name(), "Skipping provider without credential");
                continue;
            };

            let model_name = if attempted == 0 {
                model.unwrap_or_else(|| provider.default_generation_model())
            } else {
                provider.default_generation_model()
            };
            attempted += 1;

            let client = match self
                .factory
                .client(provider, cred.api_key.as_deref(), model_name)
            {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Client construction failed");
                    last_error = Some(e);
                    continue;
                }
            };

            match client.generate(prompt, &self.generation).await {
                Ok(text) => {
                    tracing::info!(
                        provider = provider.name(),
                        model = model_name,
                        chars = text.len(),
                        "Generation succeeded"
                    );
                    return text;
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        model = model_name,
                        error = %e,
                        "Generation attempt failed, trying next provider"
                    );
                    last_error = Some(e);
                }
            }
        }

        let detail = match last_error {
            Some(e) => format!("all providers failed, last error: {}", e),
            None => "no provider credentials configured".to_string(),
        };
        tracing::error!(detail = %detail, "Generation exhausted every provider");
        format!("{} {}", GENERATION_FAILED_TAG, detail)
    }

    /// Embed text, trying embedding-capable providers in fallback order.
    ///
    /// Never fails: on total exhaustion returns a zero vector of the
    /// configured default dimension, a fail-soft sentinel rather than a
    /// success signal.
    pub async fn embed(
        &self,
        text: &str,
        preferred: Option<ApiProvider>,
        model: Option<&str>,
    ) -> Vec<f32> {
        let candidates = candidate_order(preferred, &EMBEDDING_PRIORITY, |p| {
            p.supports_embedding() && self.has_credential(p)
        });

        let mut attempted = 0usize;

        for provider in candidates {
            if !provider.supports_embedding() {
                continue;
            }
            let Some(cred) = self.credential(provider).filter(|c| c.is_usable()) else {
                tracing::debug!(provider = provider.name(), "Skipping provider without credential");
                continue;
            };

            let default_model = provider
                .default_embedding_model()
                .expect("embedding candidates always have a default model");
            let model_name = if attempted == 0 {
                model.unwrap_or(default_model)
            } else {
                default_model
            };
            attempted += 1;

            let client = match self
                .factory
                .client(provider, cred.api_key.as_deref(), model_name)
            {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Client construction failed");
                    continue;
                }
            };

            match client.embed(text).await {
                Ok(vector) if !vector.is_empty() => {
                    tracing::debug!(
                        provider = provider.name(),
                        model = model_name,
                        dimension = vector.len(),
                        "Embedding succeeded"
                    );
                    return vector;
                }
                Ok(_) => {
                    tracing::warn!(provider = provider.name(), "Provider returned empty embedding");
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        model = model_name,
                        error = %e,
                        "Embedding attempt failed, trying next provider"
                    );
                }
            }
        }

        tracing::warn!(
            dimension = self.default_embed_dimension,
            "Embedding exhausted every provider, returning zero-vector sentinel"
        );
        vec![0.0; self.default_embed_dimension]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::llm::LlmClient;

    struct ScriptedClient {
        provider: ApiProvider,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
            if self.fail {
                Err(anyhow!("scripted failure"))
            } else {
                Ok(format!("answer from {}", self.provider.name()))
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail {
                Err(anyhow!("scripted failure"))
            } else {
                Ok(vec![0.5; 4])
            }
        }
    }

    /// Records every (provider, model) the resolver asked for.
    struct ScriptedFactory {
        failing: Vec<ApiProvider>,
        calls: Mutex<Vec<(ApiProvider, String)>>,
    }

    impl ScriptedFactory {
        fn new(failing: Vec<ApiProvider>) -> Self {
            Self {
                failing,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ClientFactory for ScriptedFactory {
        fn client(
            &self,
            provider: ApiProvider,
            _api_key: Option<&str>,
            model: &str,
        ) -> Result<Arc<dyn LlmClient>> {
            self.calls
                .lock()
                .unwrap()
                .push((provider, model.to_string()));
            Ok(Arc::new(ScriptedClient {
                provider,
                fail: self.failing.contains(&provider),
            }))
        }
    }

    fn provider_config(creds: &[(ApiProvider, Option<&str>)]) -> ProviderConfig {
        ProviderConfig {
            credentials: creds
                .iter()
                .map(|(p, k)| ProviderCredential {
                    provider: *p,
                    api_key: k.map(|s| s.to_string()),
                })
                .collect(),
            default_embed_dimension: 8,
        }
    }

    #[tokio::test]
    async fn test_preferred_without_credential_never_attempted() {
        let config = provider_config(&[
            (ApiProvider::OpenAI, None),
            (ApiProvider::Anthropic, Some("key")),
        ]);
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let resolver = FallbackResolver::new(&config, factory.clone());

        let answer = resolver
            .generate("hi", Some(ApiProvider::OpenAI), None)
            .await;

        assert_eq!(answer, "answer from Anthropic");
        let calls = factory.calls.lock().unwrap();
        assert!(calls.iter().all(|(p, _)| *p != ApiProvider::OpenAI));
    }

    #[tokio::test]
    async fn test_failure_falls_through_to_next_provider() {
        let config = provider_config(&[
            (ApiProvider::OpenAI, Some("key-a")),
            (ApiProvider::Google, Some("key-b")),
        ]);
        let factory = Arc::new(ScriptedFactory::new(vec![ApiProvider::OpenAI]));
        let resolver = FallbackResolver::new(&config, factory.clone());

        let answer = resolver.generate("hi", None, None).await;

        assert_eq!(answer, "answer from Google");
        let calls = factory.calls.lock().unwrap();
        assert_eq!(calls[0].0, ApiProvider::OpenAI);
        assert_eq!(calls[1].0, ApiProvider::Google);
    }

    #[tokio::test]
    async fn test_model_override_only_applies_to_primary() {
        let config = provider_config(&[
            (ApiProvider::OpenAI, Some("key-a")),
            (ApiProvider::Google, Some("key-b")),
        ]);
        let factory = Arc::new(ScriptedFactory::new(vec![ApiProvider::OpenAI]));
        let resolver = FallbackResolver::new(&config, factory.clone());

        resolver.generate("hi", None, Some("custom-model")).await;

        let calls = factory.calls.lock().unwrap();
        assert_eq!(calls[0].1, "custom-model");
        // The fallback candidate must use its own default, not the override.
        assert_eq!(calls[1].1, ApiProvider::Google.default_generation_model());
    }

    #[tokio::test]
    async fn test_generation_exhaustion_returns_tagged_string() {
        let config = provider_config(&[(ApiProvider::OpenAI, Some("key"))]);
        let factory = Arc::new(ScriptedFactory::new(vec![ApiProvider::OpenAI]));
        let resolver = FallbackResolver::new(&config, factory);

        let answer = resolver.generate("hi", None, None).await;
        assert!(answer.starts_with(GENERATION_FAILED_TAG));
    }

    #[tokio::test]
    async fn test_embed_exhaustion_returns_zero_vector() {
        let config = provider_config(&[
            (ApiProvider::OpenAI, Some("key")),
            (ApiProvider::Google, Some("key")),
        ]);
        let factory = Arc::new(ScriptedFactory::new(vec![
            ApiProvider::OpenAI,
            ApiProvider::Google,
        ]));
        let resolver = FallbackResolver::new(&config, factory);

        let vector = resolver.embed("hi", None, None).await;
        assert_eq!(vector.len(), 8);
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_embed_with_no_credentials_returns_sentinel() {
        let config = provider_config(&[]);
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let resolver = FallbackResolver::new(&config, factory.clone());

        let vector = resolver.embed("hi", None, None).await;
        assert_eq!(vector.len(), 8);
        assert!(factory.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_anthropic_excluded_from_embedding_chain() {
        let config = provider_config(&[
            (ApiProvider::Anthropic, Some("key")),
            (ApiProvider::Google, Some("key")),
        ]);
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let resolver = FallbackResolver::new(&config, factory.clone());

        let vector = resolver.embed("hi", Some(ApiProvider::Anthropic), None).await;

        assert_eq!(vector, vec![0.5; 4]);
        let calls = factory.calls.lock().unwrap();
        assert!(calls.iter().all(|(p, _)| *p != ApiProvider::Anthropic));
    }

    #[test]
    fn test_candidate_order_dedups_preferred() {
        let order = candidate_order(Some(ApiProvider::Google), &GENERATION_PRIORITY, |_| true);
        assert_eq!(order[0], ApiProvider::Google);
        assert_eq!(
            order.iter().filter(|p| **p == ApiProvider::Google).count(),
            1
        );
        assert_eq!(order.len(), GENERATION_PRIORITY.len());
    }
}
