use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Maps a text to a fixed-length vector. The pipeline depends only on this
/// trait, so tests swap in a deterministic local provider.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint. `OPENAI_BASE_URL`
/// points it at any server speaking the same wire format.
///
/// ureq is fully synchronous, which matches the blocking server loop and the
/// scheduler's worker threads; the agent-level timeout bounds each call so a
/// hung request fails one chunk instead of wedging a pass.
pub struct OpenAiEmbeddings {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(cfg: &EmbeddingConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build();
        let endpoint = format!("{}/embeddings", cfg.base_url.trim_end_matches('/'));
        Self {
            agent,
            endpoint,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        }
    }
}

impl EmbeddingProvider for OpenAiEmbeddings {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(serde_json::json!({
                "input": [text],
                "model": self.model,
            }))
            .context("embedding request failed")?;

        let parsed: EmbeddingResponse = response
            .into_json()
            .context("embedding response was not valid JSON")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embedding response contained no vectors"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = EmbeddingConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..EmbeddingConfig::default()
        };
        let client = OpenAiEmbeddings::new(&cfg);
        assert_eq!(client.endpoint, "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn response_shape_parses() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{ "data": [ { "embedding": [0.25, -1.0] } ] }"#).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.25, -1.0]);
    }
}
