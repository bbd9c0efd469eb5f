use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::llm::ApiProvider;

/// Hard server-side clamp ceilings, applied regardless of caller input.
pub const MAX_TOP_K: usize = 50;
pub const MAX_AGENTIC_LEVEL: u8 = 3;
pub const MAX_PATH_HOPS: usize = 6;
pub const MAX_EVIDENCE_NODES: usize = 64;
pub const MAX_EVIDENCE_EDGES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub providers: ProviderConfig,
    pub retrieval: RetrievalConfig,
    pub graph: GraphConfig,
}

/// One entry of the ordered fallback chain. Entry order IS fallback priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub provider: ApiProvider,
    pub api_key: Option<String>,
}

impl ProviderCredential {
    /// A provider is usable when it holds a key, or never needed one (Ollama).
    pub fn is_usable(&self) -> bool {
        self.api_key.is_some() || !self.provider.requires_api_key()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Ordered by fallback priority; each provider appears at most once.
    pub credentials: Vec<ProviderCredential>,
    /// Dimension of the zero-vector sentinel returned when every embedding
    /// provider fails.
    pub default_embed_dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Character width of the text prefix in the passage dedup key.
    pub dedup_prefix_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Default node budget for evidence matching.
    pub max_nodes: usize,
    /// Default edge budget for evidence matching.
    pub max_edges: usize,
    /// Edge-list budget loaded for path finding.
    pub max_path_edges: usize,
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.providers.default_embed_dimension == 0 {
            return Err("providers.default_embed_dimension must be > 0".into());
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.default_top_k > MAX_TOP_K {
            return Err(format!(
                "retrieval.default_top_k must be in 1..={}",
                MAX_TOP_K
            ));
        }
        if self.retrieval.dedup_prefix_chars == 0 {
            return Err("retrieval.dedup_prefix_chars must be > 0".into());
        }
        if self.graph.max_nodes == 0 || self.graph.max_nodes > MAX_EVIDENCE_NODES {
            return Err(format!("graph.max_nodes must be in 1..={}", MAX_EVIDENCE_NODES));
        }
        if self.graph.max_edges == 0 || self.graph.max_edges > MAX_EVIDENCE_EDGES {
            return Err(format!("graph.max_edges must be in 1..={}", MAX_EVIDENCE_EDGES));
        }
        if self.graph.max_path_edges == 0 || self.graph.max_path_edges > 5000 {
            return Err("graph.max_path_edges must be in 1..=5000".into());
        }

        let mut seen = std::collections::HashSet::new();
        for cred in &self.providers.credentials {
            if !seen.insert(cred.provider) {
                return Err(format!(
                    "provider {} listed more than once in credentials",
                    cred.provider.name()
                ));
            }
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut credentials = vec![
            ProviderCredential {
                provider: ApiProvider::OpenAI,
                api_key: std::env::var("OPENAI_API_KEY").ok(),
            },
            ProviderCredential {
                provider: ApiProvider::Anthropic,
                api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            },
            ProviderCredential {
                provider: ApiProvider::Google,
                api_key: std::env::var("GEMINI_API_KEY")
                    .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                    .ok(),
            },
        ];
        // Local last resort, only when a daemon is advertised.
        if std::env::var("OLLAMA_HOST").is_ok() {
            credentials.push(ProviderCredential {
                provider: ApiProvider::Ollama,
                api_key: None,
            });
        }

        Self {
            providers: ProviderConfig {
                credentials,
                default_embed_dimension: 1536,
            },
            retrieval: RetrievalConfig {
                default_top_k: 8,
                dedup_prefix_chars: 80,
            },
            graph: GraphConfig {
                max_nodes: 24,
                max_edges: 40,
                max_path_edges: 5000,
            },
        }
    }
}
