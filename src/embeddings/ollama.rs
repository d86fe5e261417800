use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embeddings::Embedder;
use crate::error::{Result, RepoRagError};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Client for the Ollama `/api/embeddings` endpoint.
///
/// One request per text; the model is chosen per call.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    /// # Panics
    ///
    /// Panics if HTTP client cannot be created (should not happen in normal operation)
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&EmbeddingRequest { model, prompt: text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RepoRagError::Embedding(format!("Request timed out after {:?}", self.timeout))
                } else {
                    RepoRagError::Embedding(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepoRagError::Embedding(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RepoRagError::Embedding(format!("Failed to parse response: {}", e)))?;

        if body.embedding.is_empty() {
            return Err(RepoRagError::Embedding(format!(
                "Model {} returned an empty embedding",
                model
            )));
        }

        Ok(body.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_slash() {
        let embedder = OllamaEmbedder::new("http://localhost:11434/", Duration::from_secs(1));
        assert_eq!(embedder.endpoint(), "http://localhost:11434/api/embeddings");
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"model": "nomic-embed-text", "prompt": "hello"}));
    }

    #[test]
    fn test_response_without_embedding_is_empty() {
        let body: EmbeddingResponse = serde_json::from_str(r#"{"error":"model not found"}"#).unwrap();
        assert!(body.embedding.is_empty());
    }
}
