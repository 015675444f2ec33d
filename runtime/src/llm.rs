//! The upstream LLM HTTP port (§6) and its production implementation.
//!
//! Grounded on the teacher's `http_input::llm_client::LlmClient` for the
//! `chat_completion` request/response shape and its tracing of usage and
//! latency; the `embedding` method has no counterpart there (that file never
//! embeds anything) and is instead generalized from the trait shape of
//! `context::vector_db::EmbeddingService`. Generalized here to take an
//! explicit credential (MAIN/BACKUP/MEMORY) per call instead of one
//! client-wide key, since the dispatch core routes distinct calls to distinct
//! credentials.

use crate::conversation::ConversationMessage;
use crate::error::DispatchError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Abstract upstream LLM transport. The dispatch core never parses an HTTP
/// response beyond these fields (§6).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        api_key: &str,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, DispatchError>;

    async fn chat_completion_stream(
        &self,
        api_key: &str,
        request: ChatCompletionRequest,
    ) -> Result<BoxStream<'static, Result<String, DispatchError>>, DispatchError>;

    async fn embedding(
        &self,
        api_key: &str,
        model: &str,
        text: &str,
    ) -> Result<Vec<f32>, DispatchError>;
}

/// OpenAI-compatible HTTP client, the production `LlmClient`.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLlmClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat_completion(
        &self,
        api_key: &str,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, DispatchError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role.to_string(),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::UpstreamFailure(format!(
                "status {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let prompt_tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let total_tokens = payload["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;

        tracing::info!(
            latency_ms = start.elapsed().as_millis() as u64,
            prompt_tokens,
            completion_tokens,
            "chat completion succeeded"
        );

        Ok(ChatCompletionResponse {
            content,
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }

    async fn chat_completion_stream(
        &self,
        api_key: &str,
        mut request: ChatCompletionRequest,
    ) -> Result<BoxStream<'static, Result<String, DispatchError>>, DispatchError> {
        use futures::StreamExt;

        request.max_tokens = request.max_tokens.or(Some(1024));
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role.to_string(),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::UpstreamFailure(format!(
                "status {status}: {text}"
            )));
        }

        let byte_stream = response.bytes_stream();
        let chunk_stream = byte_stream.map(|chunk| {
            let chunk = chunk.map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;
            let text = String::from_utf8_lossy(&chunk);
            let mut delta = String::new();
            for line in text.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(piece) = value["choices"][0]["delta"]["content"].as_str() {
                        delta.push_str(piece);
                    }
                }
            }
            Ok(delta)
        });

        Ok(chunk_stream.boxed())
    }

    async fn embedding(
        &self,
        api_key: &str,
        model: &str,
        text: &str,
    ) -> Result<Vec<f32>, DispatchError> {
        let body = serde_json::json!({ "model": model, "input": text });

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::UpstreamFailure(format!(
                "status {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DispatchError::UpstreamFailure(e.to_string()))?;

        let embedding = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| DispatchError::UpstreamFailure("missing embedding field".into()))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        Ok(embedding)
    }
}

/// Model names used by default for each call kind. Configuration, not policy
/// (§4.4).
pub struct ModelNames {
    pub chat: String,
    pub extraction: String,
    pub embedding: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            chat: "gpt-4o".to_string(),
            extraction: "gpt-4o-mini".to_string(),
            embedding: "text-embedding-3-small".to_string(),
        }
    }
}

/// Scriptable `LlmClient` double shared by unit and integration tests. Not
/// gated behind `cfg(test)` so `runtime/tests/*.rs` can use it too.
pub mod test_double {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A scriptable `LlmClient` used by integration tests; never touches the
    /// network. Every call is recorded so tests can assert on call counts.
    pub struct ScriptedLlmClient {
        pub chat_replies: parking_lot::Mutex<Vec<String>>,
        pub embedding_dim: usize,
        pub chat_calls: AtomicUsize,
        pub embedding_calls: AtomicUsize,
        pub fail_chat: std::sync::atomic::AtomicBool,
    }

    impl ScriptedLlmClient {
        pub fn new(embedding_dim: usize) -> Self {
            Self {
                chat_replies: parking_lot::Mutex::new(Vec::new()),
                embedding_dim,
                chat_calls: AtomicUsize::new(0),
                embedding_calls: AtomicUsize::new(0),
                fail_chat: std::sync::atomic::AtomicBool::new(false),
            }
        }

        pub fn chat_call_count(&self) -> usize {
            self.chat_calls.load(Ordering::SeqCst)
        }

        pub fn embedding_call_count(&self) -> usize {
            self.embedding_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn chat_completion(
            &self,
            _api_key: &str,
            _request: ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, DispatchError> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_chat.load(Ordering::SeqCst) {
                return Err(DispatchError::UpstreamFailure("scripted failure".into()));
            }
            let content = self
                .chat_replies
                .lock()
                .pop()
                .unwrap_or_else(|| "ok".to_string());
            Ok(ChatCompletionResponse {
                content,
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            })
        }

        async fn chat_completion_stream(
            &self,
            _api_key: &str,
            _request: ChatCompletionRequest,
        ) -> Result<BoxStream<'static, Result<String, DispatchError>>, DispatchError> {
            use futures::StreamExt;
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            let chunks: Vec<Result<String, DispatchError>> =
                vec![Ok("hel".into()), Ok("lo".into())];
            Ok(futures::stream::iter(chunks).boxed())
        }

        async fn embedding(
            &self,
            _api_key: &str,
            _model: &str,
            _text: &str,
        ) -> Result<Vec<f32>, DispatchError> {
            self.embedding_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1; self.embedding_dim])
        }
    }
}
