//! HTTP provider clients for the supported API families: OpenAI-compatible
//! chat/embeddings (OpenAI, Ollama), Anthropic messages, and Google
//! generateContent/embedContent.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{ApiProvider, ClientFactory, GenerationConfig, LlmClient};

const OLLAMA_BASE: &str = "http://localhost:11434";

/// External API client bound to one provider and model.
pub struct ExternalClient {
    provider: ApiProvider,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl ExternalClient {
    pub fn new(provider: ApiProvider, api_key: Option<String>, model: String) -> Result<Self> {
        if provider.requires_api_key() && api_key.is_none() {
            return Err(anyhow!("{} requires an API key", provider.name()));
        }

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .tcp_nodelay(true)
            .build()?;

        tracing::debug!(provider = provider.name(), model = %model, "Creating external client");

        Ok(Self {
            provider,
            api_key,
            model,
            client,
        })
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or("")
    }

    fn generation_endpoint(&self) -> String {
        match self.provider {
            ApiProvider::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            ApiProvider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            ApiProvider::Google => format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            ),
            ApiProvider::Ollama => format!("{}/v1/chat/completions", OLLAMA_BASE),
        }
    }

    fn embedding_endpoint(&self) -> Result<String> {
        match self.provider {
            ApiProvider::OpenAI => Ok("https://api.openai.com/v1/embeddings".to_string()),
            ApiProvider::Google => Ok(format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
                self.model
            )),
            ApiProvider::Ollama => Ok(format!("{}/api/embeddings", OLLAMA_BASE)),
            ApiProvider::Anthropic => Err(anyhow!("Anthropic has no embedding endpoint")),
        }
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// returned HTML (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') || trimmed.starts_with("<!") {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    fn request_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow!("Request to {} timed out", endpoint)
        } else if e.is_connect() {
            anyhow!("Failed to connect to {}: {}", endpoint, e)
        } else {
            anyhow!("Request to {} failed: {}", endpoint, e)
        }
    }

    /// OpenAI-compatible chat completion (OpenAI, Ollama).
    async fn openai_compatible_generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String> {
        let endpoint = self.generation_endpoint();
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false
        });

        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.key()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: OpenAiChatResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("No choices returned from {}", endpoint))
    }

    async fn anthropic_generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.generation_endpoint();
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p
        });

        let response = self
            .client
            .post(&endpoint)
            .header("x-api-key", self.key())
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Anthropic API error ({}): {}", status, error));
        }

        let result: AnthropicResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| anyhow!("No content returned from Anthropic API"))
    }

    async fn google_generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.generation_endpoint();
        let request = json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "temperature": config.temperature,
                "topP": config.top_p,
                "maxOutputTokens": config.max_tokens,
            }
        });

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", self.key())
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Google API error ({}): {}", status, error));
        }

        let result: GoogleResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow!("No response from Google Gemini"))
    }

    async fn openai_embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self.embedding_endpoint()?;
        let request = json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.key()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Embedding API error ({}): {}", status, error));
        }

        let result: OpenAiEmbeddingResponse = Self::parse_json_response(response, &endpoint).await?;
        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("No embedding returned from {}", endpoint))
    }

    async fn google_embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self.embedding_endpoint()?;
        let request = json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] }
        });

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", self.key())
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Google embedding error ({}): {}", status, error));
        }

        let result: GoogleEmbedResponse = Self::parse_json_response(response, &endpoint).await?;
        Ok(result.embedding.values)
    }

    async fn ollama_embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self.embedding_endpoint()?;
        let request = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::request_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Ollama embedding error ({}): {}", status, error));
        }

        let result: OllamaEmbedResponse = Self::parse_json_response(response, &endpoint).await?;
        Ok(result.embedding)
    }
}

#[async_trait]
impl LlmClient for ExternalClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        match self.provider {
            ApiProvider::OpenAI | ApiProvider::Ollama => {
                self.openai_compatible_generate(prompt, config).await
            }
            ApiProvider::Anthropic => self.anthropic_generate(prompt, config).await,
            ApiProvider::Google => self.google_generate(prompt, config).await,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.provider {
            ApiProvider::OpenAI => self.openai_embed(text).await,
            ApiProvider::Google => self.google_embed(text).await,
            ApiProvider::Ollama => self.ollama_embed(text).await,
            ApiProvider::Anthropic => Err(anyhow!("Anthropic has no embedding endpoint")),
        }
    }
}

/// Production factory: one `ExternalClient` per (provider, key, model).
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn client(
        &self,
        provider: ApiProvider,
        api_key: Option<&str>,
        model: &str,
    ) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(ExternalClient::new(
            provider,
            api_key.map(|k| k.to_string()),
            model.to_string(),
        )?))
    }
}

/// Response structures
#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String,
}

#[derive(Deserialize)]
struct GoogleResponse {
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: GoogleContent,
}

#[derive(Deserialize)]
struct GoogleContent {
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingRow>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingRow {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct GoogleEmbedResponse {
    embedding: GoogleEmbedValues,
}

#[derive(Deserialize)]
struct GoogleEmbedValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}
