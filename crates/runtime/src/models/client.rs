//! The [`ModelClient`] capability.
//!
//! A thin provider-dispatch layer over `reqwest`, with streaming expressed
//! as a boxed stream of incremental tokens.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::types::ErrorKind;

#[derive(Debug, Error, Clone)]
pub enum ModelClientError {
    #[error("no API key configured for provider {0}")]
    MissingApiKey(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("rate limited by provider, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("upstream provider error: {0}")]
    Upstream(String),
}

impl ModelClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingApiKey(_) | Self::UnknownProvider(_) => ErrorKind::Validation,
            Self::Request(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A chunk of a streamed completion.
#[derive(Debug, Clone)]
pub struct CompletionChunk {
    pub delta: String,
    pub done: bool,
}

/// Issues completions against whichever provider a [`super::catalog::ModelEntry`]
/// names. One implementation fronts every configured provider; callers never
/// see the provider split.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelClientError>;

    async fn stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk, ModelClientError>>, ModelClientError>;
}

/// Dispatches to Anthropic/OpenAI/OpenRouter-compatible chat completion
/// endpoints based on the model's registered provider key.
pub struct CloudModelClient {
    client: reqwest::Client,
    api_keys: std::collections::HashMap<String, String>,
    catalog: std::sync::Arc<super::catalog::Catalog>,
}

impl CloudModelClient {
    pub fn new(
        api_keys: std::collections::HashMap<String, String>,
        catalog: std::sync::Arc<super::catalog::Catalog>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
            api_keys,
            catalog,
        }
    }

    fn provider_for(&self, model_id: &str) -> Result<String, ModelClientError> {
        self.catalog
            .get(model_id)
            .map(|m| m.provider.clone())
            .map_err(|_| ModelClientError::UnknownProvider(model_id.to_string()))
    }

    fn api_key_for(&self, provider: &str) -> Result<&str, ModelClientError> {
        self.api_keys
            .get(provider)
            .map(|s| s.as_str())
            .ok_or_else(|| ModelClientError::MissingApiKey(provider.to_string()))
    }
}

#[async_trait]
impl ModelClient for CloudModelClient {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelClientError> {
        let provider = self.provider_for(&req.model_id)?;
        let api_key = self.api_key_for(&provider)?;

        let (url, body) = build_request(&provider, &req);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelClientError::Request(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ModelClientError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelClientError::Upstream(format!("{status}: {text}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ModelClientError::Upstream(e.to_string()))?;
        parse_response(&provider, &json)
    }

    async fn stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk, ModelClientError>>, ModelClientError> {
        // Streaming degrades to a single terminal chunk; providers' SSE
        // framing is out of scope.
        let response = self.complete(req).await?;
        let chunk = CompletionChunk {
            delta: response.content,
            done: true,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }
}

fn build_request(provider: &str, req: &CompletionRequest) -> (String, serde_json::Value) {
    match provider {
        "anthropic" => {
            let messages: Vec<_> = req
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| {
                    serde_json::json!({
                        "role": if m.role == Role::User { "user" } else { "assistant" },
                        "content": m.content,
                    })
                })
                .collect();
            (
                "https://api.anthropic.com/v1/messages".to_string(),
                serde_json::json!({
                    "model": req.model_id,
                    "system": req.system_prompt,
                    "messages": messages,
                    "max_tokens": req.max_tokens,
                    "temperature": req.temperature,
                }),
            )
        }
        _ => {
            let mut messages = Vec::new();
            if let Some(sys) = &req.system_prompt {
                messages.push(serde_json::json!({ "role": "system", "content": sys }));
            }
            for m in &req.messages {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                messages.push(serde_json::json!({ "role": role, "content": m.content }));
            }
            let base = if provider == "openrouter" {
                "https://openrouter.ai/api/v1/chat/completions"
            } else {
                "https://api.openai.com/v1/chat/completions"
            };
            (
                base.to_string(),
                serde_json::json!({
                    "model": req.model_id,
                    "messages": messages,
                    "max_tokens": req.max_tokens,
                    "temperature": req.temperature,
                }),
            )
        }
    }
}

fn parse_response(
    provider: &str,
    json: &serde_json::Value,
) -> Result<CompletionResponse, ModelClientError> {
    if provider == "anthropic" {
        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ModelClientError::Upstream("missing content".into()))?
            .to_string();
        let prompt_tokens = json
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = json
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Ok(CompletionResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    } else {
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ModelClientError::Upstream("missing content".into()))?
            .to_string();
        let prompt_tokens = json
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Ok(CompletionResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }
}

/// Deterministic client for tests: echoes a canned response derived from
/// the last user message, with no network access.
pub struct MockModelClient;

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ModelClientError> {
        let last = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(CompletionResponse {
            content: format!("mock response to: {last}"),
            prompt_tokens: last.split_whitespace().count() as u32,
            completion_tokens: 8,
        })
    }

    async fn stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<CompletionChunk, ModelClientError>>, ModelClientError> {
        let resp = self.complete(req).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(CompletionChunk {
                delta: resp.content,
                done: true,
            })
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_echoes_last_user_message() {
        let client = MockModelClient;
        let resp = client
            .complete(CompletionRequest {
                model_id: "mock".into(),
                system_prompt: None,
                messages: vec![ChatMessage {
                    role: Role::User,
                    content: "hello".into(),
                }],
                max_tokens: 100,
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert!(resp.content.contains("hello"));
    }
}
