//! C3 — `UserHistoryRegistry`: a bounded, lazily-hydrated per-user
//! conversation ring.
//!
//! Grounded on the teacher's `reasoning::circuit_breaker::CircuitBreakerRegistry`
//! for the registry shape (`DashMap` of per-key state, a per-entry lock for
//! hydrate/append/snapshot rather than one lock for the whole registry).

use crate::conversation::{Conversation, ConversationMessage};
use crate::error::DispatchError;
use crate::store::Store;
use crate::types::Role;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

struct UserHistory {
    conversation: Conversation,
    hydrated: bool,
    last_active: Instant,
}

impl UserHistory {
    fn new() -> Self {
        Self {
            conversation: Conversation::new(),
            hydrated: false,
            last_active: Instant::now(),
        }
    }
}

/// Per-user bounded conversation ring, lazily hydrated from the `Store` on
/// first access (§4.3). `max_messages` is `2 * MAX_ROUNDS`.
pub struct UserHistoryRegistry {
    store: Arc<dyn Store>,
    max_messages: usize,
    entries: DashMap<String, Arc<Mutex<UserHistory>>>,
}

impl UserHistoryRegistry {
    pub fn new(store: Arc<dyn Store>, max_rounds: usize) -> Self {
        Self {
            store,
            max_messages: max_rounds * 2,
            entries: DashMap::new(),
        }
    }

    fn entry_for(&self, user_id: &str) -> Arc<Mutex<UserHistory>> {
        self.entries
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserHistory::new())))
            .clone()
    }

    /// Returns an immutable snapshot of the user's recent messages,
    /// hydrating from the store on first access.
    pub async fn get(&self, user_id: &str) -> Result<Vec<ConversationMessage>, DispatchError> {
        let entry = self.entry_for(user_id);
        let mut history = entry.lock().await;
        if !history.hydrated {
            self.hydrate(&mut history, user_id).await?;
        }
        Ok(history.conversation.messages().to_vec())
    }

    async fn hydrate(&self, history: &mut UserHistory, user_id: &str) -> Result<(), DispatchError> {
        let recent = self
            .store
            .fetch_recent_turns(user_id, self.max_messages)
            .await?;
        let mut messages: Vec<ConversationMessage> = recent
            .into_iter()
            .rev()
            .map(|t| ConversationMessage {
                role: t.role,
                content: t.content,
            })
            .collect();
        if messages.len() > self.max_messages {
            let excess = messages.len() - self.max_messages;
            messages.drain(0..excess);
        }
        history.conversation = Conversation::from_messages(messages);
        history.hydrated = true;
        tracing::debug!(user_id, "history hydrated from store");
        Ok(())
    }

    /// Append a message, hydrating first if this is the first touch for the
    /// user, then trimming from the head to stay within `max_messages`.
    pub async fn append(
        &self,
        user_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), DispatchError> {
        let entry = self.entry_for(user_id);
        let mut history = entry.lock().await;
        if !history.hydrated {
            self.hydrate(&mut history, user_id).await?;
        }
        history.conversation.push(ConversationMessage {
            role,
            content: content.into(),
        });
        history.conversation.truncate_front(self.max_messages);
        history.last_active = Instant::now();
        Ok(())
    }
}
