//! AI Request Dispatch Core
//!
//! A concurrent, rate-limited request broker that multiplexes many client
//! conversations onto a small number of upstream LLM credentials while
//! enforcing per-credential request-per-minute ceilings.
//!
//! Five components: [`queue::RateLimitedQueue`] (C1) does FIFO admission and
//! periodic release; [`dispatch::DispatchManager`] (C2) owns both lanes,
//! credential selection, and the worker pool; [`history::UserHistoryRegistry`]
//! (C3) is the bounded per-user conversation ring; [`agent::AgentRunner`] (C4)
//! assembles prompts and drives the dispatcher; [`memory_trigger::MemoryTriggerHook`]
//! (C5) spawns background summarize-and-embed jobs every N turns.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod llm;
pub mod memory_trigger;
pub mod queue;
pub mod store;
pub mod types;

pub use agent::AgentRunner;
pub use config::Config;
pub use dispatch::{DispatchManager, DispatchStats};
pub use error::DispatchError;
pub use history::UserHistoryRegistry;
pub use llm::{HttpLlmClient, LlmClient};
pub use memory_trigger::MemoryTriggerHook;
pub use queue::RateLimitedQueue;
pub use store::{InMemoryStore, Store};
pub use types::{CredentialKind, LaneKind, Mode, Role};

use std::sync::Arc;

/// Wires the five components together into a single handle: construct once
/// per process, call [`DispatchCore::start`] before handling traffic, and
/// [`DispatchCore::stop`] to drain on shutdown.
pub struct DispatchCore {
    pub dispatcher: Arc<DispatchManager>,
    pub history: Arc<UserHistoryRegistry>,
    pub agent: Arc<AgentRunner>,
    pub memory_trigger: Arc<MemoryTriggerHook>,
    pub store: Arc<dyn Store>,
}

impl DispatchCore {
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>, store: Arc<dyn Store>) -> Self {
        let dispatcher = DispatchManager::new(config, llm);
        let history = Arc::new(UserHistoryRegistry::new(
            store.clone(),
            config.max_history_rounds,
        ));
        let agent = Arc::new(AgentRunner::new(
            dispatcher.clone(),
            history.clone(),
            store.clone(),
        ));
        let memory_trigger = Arc::new(MemoryTriggerHook::new(
            dispatcher.clone(),
            store.clone(),
            config.memory_trigger_every_n_turns,
        ));

        Self {
            dispatcher,
            history,
            agent,
            memory_trigger,
            store,
        }
    }

    /// Construct the default production wiring: `Config::from_env()`,
    /// `HttpLlmClient`, and an `InMemoryStore` (swap for a real database
    /// adapter by constructing `DispatchCore::new` directly).
    pub fn from_env() -> Result<Self, DispatchError> {
        let config = Config::from_env()?;
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new());
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Ok(Self::new(&config, llm, store))
    }

    pub fn start(&self) {
        self.dispatcher.start();
    }

    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    /// Run one chat turn and, if the turn count lands on the trigger
    /// cadence, spawn a background memory-extraction job.
    pub async fn chat(&self, user_id: &str, user_message: &str) -> Result<String, DispatchError> {
        let reply = self
            .agent
            .run(user_id, user_message, None, None, Mode::Chat)
            .await?;

        let conversation_text = format!("User: {user_message}\nAssistant: {reply}");
        self.memory_trigger
            .maybe_spawn(user_id, conversation_text)
            .await;

        Ok(reply)
    }
}
