//! C2 — `DispatchManager`: lane ownership, credential selection, and the
//! bounded worker pool that actually talks to the upstream LLM.
//!
//! The 5:1 MAIN:BACKUP distribution is grounded directly on
//! `agents/runner.py`'s `AIServiceManager.get_api_for_next_request` (a
//! counter-mod-6 check under a lock); the async-collapsed worker pool is the
//! Open-Question decision recorded in `SPEC_FULL.md` §9 — a bounded
//! `tokio::sync::Semaphore` stands in for a separate thread pool, so the
//! release engine (which never acquires a permit) cannot deadlock against it.

use crate::config::{Config, Credentials};
use crate::conversation::ConversationMessage;
use crate::error::DispatchError;
use crate::llm::{ChatCompletionRequest, LlmClient, ModelNames};
use crate::queue::{LaneStatsSnapshot, RateLimitedQueue};
use crate::types::{CredentialKind, ExtractionKind};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialCounters {
    pub total_calls: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchStats {
    pub chat_lane: LaneStatsSnapshot,
    pub memory_lane: LaneStatsSnapshot,
    pub credentials: HashMap<CredentialKind, CredentialCounters>,
}

fn extraction_instruction(kind: ExtractionKind) -> &'static str {
    match kind {
        ExtractionKind::RoundSummary => {
            "Summarize the key points of this conversation round in a few sentences.\n\n"
        }
        ExtractionKind::ConversationChunk => {
            "Summarize this conversation chunk, preserving important facts the user shared.\n\n"
        }
        ExtractionKind::Generic => "Summarize the following for long-term memory.\n\n",
    }
}

pub struct DispatchManager {
    chat_lane: Arc<RateLimitedQueue>,
    memory_lane: Arc<RateLimitedQueue>,
    llm: Arc<dyn LlmClient>,
    credentials: Credentials,
    models: ModelNames,
    embedding_dim: usize,
    distribution_counter: AtomicU64,
    worker_semaphore: Arc<Semaphore>,
    credential_stats: Mutex<HashMap<CredentialKind, CredentialCounters>>,
}

impl DispatchManager {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>) -> Arc<Self> {
        Arc::new(Self {
            chat_lane: RateLimitedQueue::new("chat", config.chat_lane.clone()),
            memory_lane: RateLimitedQueue::new("memory", config.memory_lane.clone()),
            llm,
            credentials: config.credentials.clone(),
            models: ModelNames::default(),
            embedding_dim: config.embedding_dim,
            distribution_counter: AtomicU64::new(0),
            worker_semaphore: Arc::new(Semaphore::new(config.worker_pool_size)),
            credential_stats: Mutex::new(HashMap::new()),
        })
    }

    /// Start both lanes' release engines. Must be called once before any
    /// `admit` can ever resolve as `Released`.
    pub fn start(&self) {
        self.chat_lane.start();
        self.memory_lane.start();
    }

    /// Stop both lanes, draining every outstanding admission as
    /// `ShuttingDown`.
    pub async fn stop(&self) {
        tracing::info!("dispatch manager shutting down");
        self.chat_lane.stop().await;
        self.memory_lane.stop().await;
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            chat_lane: self.chat_lane.stats(),
            memory_lane: self.memory_lane.stats(),
            credentials: self.credential_stats.lock().clone(),
        }
    }

    fn select_chat_credential(&self) -> (CredentialKind, String) {
        let count = self.distribution_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count % 6 == 0 {
            (CredentialKind::Backup, self.credentials.backup_api_key.clone())
        } else {
            (CredentialKind::Main, self.credentials.main_api_key.clone())
        }
    }

    fn select_memory_credential(&self) -> (CredentialKind, String) {
        match &self.credentials.memory_api_key {
            Some(key) => (CredentialKind::Memory, key.clone()),
            None => {
                tracing::warn!("MEMORY credential absent; falling back to BACKUP");
                (CredentialKind::Backup, self.credentials.backup_api_key.clone())
            }
        }
    }

    fn record_call_start(&self, kind: CredentialKind) {
        let mut stats = self.credential_stats.lock();
        let entry = stats.entry(kind).or_default();
        entry.total_calls += 1;
        entry.in_flight += 1;
    }

    fn record_call_end(&self, kind: CredentialKind, success: bool) {
        let mut stats = self.credential_stats.lock();
        let entry = stats.entry(kind).or_default();
        entry.in_flight = entry.in_flight.saturating_sub(1);
        if success {
            entry.completed += 1;
        } else {
            entry.failed += 1;
        }
    }

    pub async fn run_chat(
        &self,
        messages: Vec<ConversationMessage>,
        model: Option<String>,
    ) -> Result<String, DispatchError> {
        let waited = self.chat_lane.admit().await?;
        let (credential, api_key) = self.select_chat_credential();
        self.record_call_start(credential);

        let permit = self
            .worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        let request = ChatCompletionRequest {
            model: model.unwrap_or_else(|| self.models.chat.clone()),
            messages,
            temperature: 0.7,
            max_tokens: None,
        };

        let result = self.llm.chat_completion(&api_key, request).await;
        drop(permit);
        self.record_call_end(credential, result.is_ok());

        tracing::info!(
            credential = %credential,
            waited_ms = waited.as_millis() as u64,
            ok = result.is_ok(),
            "chat call dispatched"
        );

        result.map(|r| r.content)
    }

    pub async fn run_chat_stream(
        &self,
        messages: Vec<ConversationMessage>,
        model: Option<String>,
    ) -> Result<BoxStream<'static, Result<String, DispatchError>>, DispatchError> {
        use futures::StreamExt;

        let _waited = self.chat_lane.admit().await?;
        let (credential, api_key) = self.select_chat_credential();
        self.record_call_start(credential);

        let permit = self
            .worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        let request = ChatCompletionRequest {
            model: model.unwrap_or_else(|| self.models.chat.clone()),
            messages,
            temperature: 0.7,
            max_tokens: None,
        };

        match self.llm.chat_completion_stream(&api_key, request).await {
            Ok(stream) => {
                self.record_call_end(credential, true);
                // The permit rides along inside the closure so it is held for
                // the lifetime of the stream, not just until it starts.
                Ok(stream.map(move |item| {
                    let _keep_alive = &permit;
                    item
                }).boxed())
            }
            Err(e) => {
                self.record_call_end(credential, false);
                Err(e)
            }
        }
    }

    /// Embedding failures degrade to a zero vector of the configured
    /// dimension (§4.2, §9) rather than propagating — a pragmatic fallback
    /// inherited from the original implementation's `[0.0] * 1536`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, DispatchError> {
        let _waited = self.memory_lane.admit().await?;
        let (credential, api_key) = self.select_memory_credential();
        self.record_call_start(credential);

        let permit = self
            .worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        let result = self
            .llm
            .embedding(&api_key, &self.models.embedding, text)
            .await;
        drop(permit);

        match result {
            Ok(vector) => {
                self.record_call_end(credential, true);
                Ok(vector)
            }
            Err(e) => {
                self.record_call_end(credential, false);
                tracing::warn!(error = %e, "embedding call failed; returning zero-vector fallback");
                Ok(vec![0.0; self.embedding_dim])
            }
        }
    }

    pub async fn extract_memory(
        &self,
        conversation_text: &str,
        kind: ExtractionKind,
    ) -> Result<String, DispatchError> {
        let _waited = self.memory_lane.admit().await?;
        let (credential, api_key) = self.select_memory_credential();
        self.record_call_start(credential);

        let permit = self
            .worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        let prompt = format!("{}{}", extraction_instruction(kind), conversation_text);
        let request = ChatCompletionRequest {
            model: self.models.extraction.clone(),
            messages: vec![ConversationMessage::user(prompt)],
            temperature: 0.3,
            max_tokens: Some(400),
        };

        let result = self.llm.chat_completion(&api_key, request).await;
        drop(permit);
        self.record_call_end(credential, result.is_ok());

        result.map(|r| r.content)
    }
}
