//! The [`Embedder`] capability.
//!
//! Ollama and OpenAI HTTP-compatible providers are auto-detected from
//! environment variables, with a mock fallback for offline use. Callers
//! (Index, Memory, Cache's semantic tier) depend on `Arc<dyn Embedder>`
//! rather than a concrete provider.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbedderConfig;
use crate::types::ErrorKind;

#[derive(Debug, Error, Clone)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding response malformed: {0}")]
    Malformed(String),
    #[error("text exceeds embedder's maximum length of {max} characters")]
    TextTooLong { max: usize },
}

impl EmbedderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TextTooLong { .. } => ErrorKind::Validation,
            Self::Request(_) => ErrorKind::Transient,
            Self::Malformed(_) => ErrorKind::Upstream,
        }
    }
}

/// Converts arbitrary text into a fixed-dimension vector.
/// Implementations must return vectors of exactly `dimension()` length.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    fn dimension(&self) -> usize;

    /// Embeds a batch, preserving input order. The default calls [`embed`]
    /// sequentially; HTTP-backed implementations override this to issue a
    /// single batched request.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Provider {
    Ollama,
    OpenAi,
}

/// HTTP-backed embedder speaking either Ollama's native `/api/embed` or the
/// OpenAI-compatible `/embeddings` endpoint, auto-detected from config.
pub struct HttpEmbedder {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    base_url: String,
    api_key: Option<String>,
    dimension: usize,
    max_text_length: usize,
}

impl HttpEmbedder {
    /// Builds an embedder from [`EmbedderConfig`]. Returns `None` when no
    /// endpoint/key combination resolves to a provider, signalling the
    /// caller to fall back to [`MockEmbedder`].
    pub fn from_config(config: &EmbedderConfig) -> Result<Option<Self>, EmbedderError> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };

        let provider = if endpoint.contains("localhost") || endpoint.contains("127.0.0.1") {
            Provider::Ollama
        } else if config.api_key.is_some() {
            Provider::OpenAi
        } else {
            return Ok(None);
        };

        let (default_model, default_max) = match provider {
            Provider::Ollama => ("nomic-embed-text".to_string(), 8192),
            Provider::OpenAi => ("text-embedding-3-small".to_string(), 8191),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        Ok(Some(Self {
            client,
            provider,
            model: default_model,
            base_url: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            max_text_length: default_max,
        }))
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        match self.provider {
            Provider::Ollama => self.request_ollama(texts).await,
            Provider::OpenAi => self.request_openai(texts).await,
        }
    }

    async fn request_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedderError::Request(e.to_string()))?;
        let json: serde_json::Value = check_and_parse(resp).await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EmbedderError::Malformed("missing embeddings field".into()))?;
        embeddings.iter().map(parse_float_array).collect()
    }

    async fn request_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| EmbedderError::Request(e.to_string()))?;
        let json: serde_json::Value = check_and_parse(resp).await?;
        let data = json
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EmbedderError::Malformed("missing data field".into()))?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let embedding = item
                .get("embedding")
                .and_then(|v| v.as_array())
                .ok_or_else(|| EmbedderError::Malformed("missing embedding item".into()))?;
            indexed.push((index, parse_float_array(embedding)?));
        }
        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

async fn check_and_parse(resp: reqwest::Response) -> Result<serde_json::Value, EmbedderError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(EmbedderError::Request(format!("upstream returned {status}: {body}")));
    }
    resp.json()
        .await
        .map_err(|e| EmbedderError::Malformed(e.to_string()))
}

fn parse_float_array(v: &serde_json::Value) -> Result<Vec<f32>, EmbedderError> {
    v.as_array()
        .ok_or_else(|| EmbedderError::Malformed("expected array".into()))?
        .iter()
        .map(|f| {
            f.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedderError::Malformed("expected float".into()))
        })
        .collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.len() > self.max_text_length {
            return Err(EmbedderError::TextTooLong {
                max: self.max_text_length,
            });
        }
        let mut out = self.request_batch(std::slice::from_ref(&text.to_string())).await?;
        out.pop().ok_or_else(|| EmbedderError::Malformed("empty response".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.request_batch(texts).await
    }
}

/// Deterministic hash-based embedder for tests and for local-only
/// deployments with no configured provider.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vec = vec![0f32; self.dimension];
        for (i, slot) in vec.iter_mut().enumerate() {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let bits = hasher.finish();
            *slot = ((bits % 2000) as f32 / 1000.0) - 1.0;
        }
        Ok(vec)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Constructs the configured embedder, falling back to [`MockEmbedder`]
/// when no endpoint/key is configured, so the runtime can run fully
/// offline.
pub fn build_embedder(config: &EmbedderConfig) -> Result<std::sync::Arc<dyn Embedder>, EmbedderError> {
    match HttpEmbedder::from_config(config)? {
        Some(embedder) => {
            tracing::info!(dimension = config.dimension, "using HTTP embedder");
            Ok(std::sync::Arc::new(embedder))
        }
        None => {
            tracing::debug!(dimension = config.dimension, "no embedder endpoint configured, using mock");
            Ok(std::sync::Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let e = MockEmbedder::new(16);
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn mock_embedder_batch_preserves_order() {
        let e = MockEmbedder::new(8);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = e.embed_batch(&texts).await.unwrap();
        for (i, t) in texts.iter().enumerate() {
            assert_eq!(batch[i], e.embed(t).await.unwrap());
        }
    }
}
