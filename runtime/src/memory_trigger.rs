//! C5 — `MemoryTriggerHook`: after each chat turn, decide whether to spawn a
//! background summarize-and-embed job.
//!
//! Grounded on `agents/runner.py`'s memory-extraction flow
//! (`extract_memory_content` + `generate_embedding`, persisted as a
//! `MemoryVector` row in `agents/database.py`): the extraction/embedding pair
//! is fire-and-forget from the caller's perspective and must never surface a
//! failure back onto the turn's response path (§4.5, §7).

use crate::dispatch::DispatchManager;
use crate::store::Store;
use crate::types::{ExtractionKind, Mode};
use std::sync::Arc;

pub struct MemoryTriggerHook {
    dispatcher: Arc<DispatchManager>,
    store: Arc<dyn Store>,
    every_n_turns: u64,
}

impl MemoryTriggerHook {
    pub fn new(dispatcher: Arc<DispatchManager>, store: Arc<dyn Store>, every_n_turns: u64) -> Self {
        Self {
            dispatcher,
            store,
            every_n_turns,
        }
    }

    /// Call after a turn has been persisted. Spawns a background job iff the
    /// user's chat-mode turn count is a multiple of `every_n_turns`. Never
    /// blocks the caller and never returns an error — a failure in the
    /// background job is logged and dropped.
    pub async fn maybe_spawn(&self, user_id: &str, conversation_text: String) {
        let turn_count = match self.store.count_turns_for_mode(user_id, Mode::Chat).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "could not read turn count; skipping memory trigger check");
                return;
            }
        };

        if turn_count == 0 || turn_count % self.every_n_turns != 0 {
            return;
        }

        tracing::info!(user_id, turn_count, "spawning memory extraction job");
        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            if let Err(e) =
                run_extraction_job(dispatcher, store, &user_id, conversation_text).await
            {
                tracing::warn!(user_id, error = %e, "memory extraction job failed");
            }
        });
    }
}

async fn run_extraction_job(
    dispatcher: Arc<DispatchManager>,
    store: Arc<dyn Store>,
    user_id: &str,
    conversation_text: String,
) -> Result<(), crate::error::DispatchError> {
    let summary = dispatcher
        .extract_memory(&conversation_text, ExtractionKind::RoundSummary)
        .await?;
    let embedding = dispatcher.embed(&summary).await?;
    store
        .store_memory_vector(
            user_id,
            "round_summary",
            &summary,
            embedding,
            serde_json::json!({ "source": "memory_trigger" }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Credentials, LaneConfig};
    use crate::llm::test_double::ScriptedLlmClient;
    use crate::store::InMemoryStore;
    use crate::types::Role;
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
    async fn spawns_exactly_every_nth_turn() {
        let config = test_config();
        let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
        let dispatcher = DispatchManager::new(&config, llm.clone());
        dispatcher.start();
        let store = Arc::new(InMemoryStore::new());
        let hook = MemoryTriggerHook::new(
            dispatcher.clone(),
            store.clone(),
            config.memory_trigger_every_n_turns,
        );

        for i in 1..=9u64 {
            store
                .append_turn("u1", Role::User, &format!("turn {i}"), Mode::Chat, "agent")
                .await
                .unwrap();
            hook.maybe_spawn("u1", format!("conversation up to turn {i}"))
                .await;
        }

        // Give the background jobs a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(llm.chat_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(llm.embedding_call_count(), 3);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn does_not_spawn_on_off_turns() {
        let config = test_config();
        let llm = Arc::new(ScriptedLlmClient::new(config.embedding_dim));
        let dispatcher = DispatchManager::new(&config, llm.clone());
        dispatcher.start();
        let store = Arc::new(InMemoryStore::new());
        let hook = MemoryTriggerHook::new(
            dispatcher.clone(),
            store.clone(),
            config.memory_trigger_every_n_turns,
        );

        store
            .append_turn("u1", Role::User, "turn 1", Mode::Chat, "agent")
            .await
            .unwrap();
        hook.maybe_spawn("u1", "conversation".to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(llm.embedding_call_count(), 0);
        dispatcher.stop().await;
    }
}
