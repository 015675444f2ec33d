//! C4 — `AgentRunner`: composes recent history, retrieved long-term context,
//! and the current user turn into a single flat prompt, then drives the
//! dispatcher.

use crate::conversation::{assemble_prompt, ConversationMessage};
use crate::dispatch::DispatchManager;
use crate::error::DispatchError;
use crate::history::UserHistoryRegistry;
use crate::store::Store;
use crate::types::{Mode, Role};
use futures::stream::BoxStream;
use std::sync::Arc;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant continuing an ongoing conversation with the user.";

pub struct AgentRunner {
    dispatcher: Arc<DispatchManager>,
    history: Arc<UserHistoryRegistry>,
    store: Arc<dyn Store>,
}

impl AgentRunner {
    pub fn new(
        dispatcher: Arc<DispatchManager>,
        history: Arc<UserHistoryRegistry>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            dispatcher,
            history,
            store,
        }
    }

    /// Run one chat turn. When `history_override` is supplied, it is used
    /// verbatim and the registry is neither read nor appended to; otherwise
    /// the registry is read for context and appended to after the reply.
    pub async fn run(
        &self,
        user_id: &str,
        user_message: &str,
        history_override: Option<Vec<ConversationMessage>>,
        model: Option<String>,
        mode: Mode,
    ) -> Result<String, DispatchError> {
        let history = match &history_override {
            Some(messages) => messages.clone(),
            None => self.history.get(user_id).await?,
        };

        let retrieved_context = if mode == Mode::Chat {
            self.retrieve_context(user_id, user_message).await?
        } else {
            None
        };

        let prompt = assemble_prompt(&history, retrieved_context.as_deref(), user_message);
        let messages = vec![
            ConversationMessage::system(DEFAULT_SYSTEM_PROMPT),
            ConversationMessage::user(prompt),
        ];

        let reply = self.dispatcher.run_chat(messages, model).await?;

        self.store
            .append_turn(user_id, Role::User, user_message, mode, "assistant")
            .await?;
        self.store
            .append_turn(user_id, Role::Assistant, &reply, mode, "assistant")
            .await?;

        if history_override.is_none() {
            self.history.append(user_id, Role::User, user_message).await?;
            self.history.append(user_id, Role::Assistant, &reply).await?;
        }

        Ok(reply)
    }

    pub async fn run_stream(
        &self,
        user_id: &str,
        user_message: &str,
        history_override: Option<Vec<ConversationMessage>>,
        model: Option<String>,
        mode: Mode,
    ) -> Result<BoxStream<'static, Result<String, DispatchError>>, DispatchError> {
        let history = match &history_override {
            Some(messages) => messages.clone(),
            None => self.history.get(user_id).await?,
        };
        let retrieved_context = if mode == Mode::Chat {
            self.retrieve_context(user_id, user_message).await?
        } else {
            None
        };
        let prompt = assemble_prompt(&history, retrieved_context.as_deref(), user_message);
        let messages = vec![
            ConversationMessage::system(DEFAULT_SYSTEM_PROMPT),
            ConversationMessage::user(prompt),
        ];
        self.dispatcher.run_chat_stream(messages, model).await
    }

    /// Convenience wrapper matching the legacy contract: always returns a
    /// string, folding any typed error into a human-readable message instead
    /// of propagating it.
    pub async fn run_or_message(
        &self,
        user_id: &str,
        user_message: &str,
        history_override: Option<Vec<ConversationMessage>>,
        model: Option<String>,
        mode: Mode,
    ) -> String {
        match self
            .run(user_id, user_message, history_override, model, mode)
            .await
        {
            Ok(reply) => reply,
            Err(e) => format!("[Dispatch Error] {e}"),
        }
    }

    async fn retrieve_context(
        &self,
        user_id: &str,
        user_message: &str,
    ) -> Result<Option<String>, DispatchError> {
        let query_embedding = self.dispatcher.embed(user_message).await?;
        let hits = self
            .store
            .similarity_search(user_id, &query_embedding, 3)
            .await?;
        if hits.is_empty() {
            return Ok(None);
        }
        let joined = hits
            .into_iter()
            .map(|h| h.content)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Credentials, LaneConfig};
    use crate::llm::test_double::ScriptedLlmClient;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            chat_lane: LaneConfig {
                rpm: 6000,
                capacity: 1000,
                timeout: Duration::from_secs(30),
            },
            memory_lane: LaneConfig {
                rpm: 6000,
                capacity: 1000,
                timeout: Duration::from_secs(30),
            },
            worker_pool_size: 16,
            credentials: Credentials {
                main_api_key: "main".into(),
                backup_api_key: "backup".into(),
                memory_api_key: None,
            },
            max_history_rounds: 3,
            memory_trigger_every_n_turns: 3,
            embedding_dim: 4,
        }
    }

    #[tokio::test]
    async fn run_appends_to_history_and_store() {
        let config = test_config();
        let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
        llm.chat_replies.lock().push("nice to meet you".to_string());
        let dispatcher = DispatchManager::new(&config, llm);
        dispatcher.start();
        let store = Arc::new(InMemoryStore::new());
        let history = Arc::new(UserHistoryRegistry::new(store.clone(), config.max_history_rounds));
        let agent = AgentRunner::new(dispatcher.clone(), history.clone(), store.clone());

        let reply = agent
            .run("u1", "hi", None, None, Mode::Chat)
            .await
            .unwrap();
        assert_eq!(reply, "nice to meet you");

        let turns = store.fetch_recent_turns("u1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);

        let messages = history.get("u1").await.unwrap();
        assert_eq!(messages.len(), 2);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn eval_mode_skips_retrieval() {
        let config = test_config();
        let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
        llm.chat_replies.lock().push("eval reply".to_string());
        let dispatcher = DispatchManager::new(&config, llm.clone());
        dispatcher.start();
        let store = Arc::new(InMemoryStore::new());
        let history = Arc::new(UserHistoryRegistry::new(store.clone(), config.max_history_rounds));
        let agent = AgentRunner::new(dispatcher.clone(), history, store);

        let _ = agent.run("u1", "score this", None, None, Mode::Eval).await.unwrap();
        assert_eq!(llm.embedding_call_count(), 0);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn history_override_bypasses_registry() {
        let config = test_config();
        let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
        llm.chat_replies.lock().push("ok".to_string());
        let dispatcher = DispatchManager::new(&config, llm);
        dispatcher.start();
        let store = Arc::new(InMemoryStore::new());
        let history = Arc::new(UserHistoryRegistry::new(store.clone(), config.max_history_rounds));
        let agent = AgentRunner::new(dispatcher.clone(), history.clone(), store);

        let override_history = vec![ConversationMessage::user("earlier")];
        let _ = agent
            .run("u1", "hi", Some(override_history), None, Mode::Chat)
            .await
            .unwrap();

        let messages = history.get("u1").await.unwrap();
        assert!(messages.is_empty());
        dispatcher.stop().await;
    }
}
