//! The persistence port (§6) and an in-memory implementation used by tests
//! and standalone deployments.
//!
//! Field shapes are grounded directly on the original SQLAlchemy models
//! (`turns` ~ `Conversation`, `memory_vectors` ~ `MemoryVector`): per-turn
//! role/content/mode/agent-type/sequence-number, and per-memory
//! kind/content/embedding/metadata.

use crate::error::DispatchError;
use crate::types::{MemoryId, Mode, Role, TurnId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub mode: Mode,
    pub agent_type: String,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecentTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MemoryVector {
    pub id: MemoryId,
    pub user_id: String,
    pub kind: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub content: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn append_turn(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        mode: Mode,
        agent_type: &str,
    ) -> Result<TurnId, DispatchError>;

    async fn fetch_recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentTurn>, DispatchError>;

    async fn count_turns_for_mode(&self, user_id: &str, mode: Mode) -> Result<u64, DispatchError>;

    async fn store_memory_vector(
        &self,
        user_id: &str,
        kind: &str,
        content: &str,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<MemoryId, DispatchError>;

    async fn similarity_search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, DispatchError>;
}

#[derive(Default)]
struct UserLog {
    turns: Vec<Turn>,
    next_sequence: u64,
}

/// In-memory `Store`; used by tests and by deployments without a database.
pub struct InMemoryStore {
    logs: DashMap<String, Arc<Mutex<UserLog>>>,
    memories: DashMap<String, Arc<Mutex<Vec<MemoryVector>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
            memories: DashMap::new(),
        }
    }

    fn log_for(&self, user_id: &str) -> Arc<Mutex<UserLog>> {
        self.logs
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserLog::default())))
            .clone()
    }

    fn memories_for(&self, user_id: &str) -> Arc<Mutex<Vec<MemoryVector>>> {
        self.memories
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append_turn(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        mode: Mode,
        agent_type: &str,
    ) -> Result<TurnId, DispatchError> {
        let log = self.log_for(user_id);
        let mut log = log.lock();
        let sequence_number = log.next_sequence;
        log.next_sequence += 1;
        let id = TurnId::new();
        log.turns.push(Turn {
            id,
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            mode,
            agent_type: agent_type.to_string(),
            sequence_number,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn fetch_recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RecentTurn>, DispatchError> {
        let log = self.log_for(user_id);
        let log = log.lock();
        Ok(log
            .turns
            .iter()
            .rev()
            .take(limit)
            .map(|t| RecentTurn {
                role: t.role,
                content: t.content.clone(),
                timestamp: t.timestamp,
            })
            .collect())
    }

    async fn count_turns_for_mode(&self, user_id: &str, mode: Mode) -> Result<u64, DispatchError> {
        let log = self.log_for(user_id);
        let log = log.lock();
        Ok(log.turns.iter().filter(|t| t.mode == mode).count() as u64)
    }

    async fn store_memory_vector(
        &self,
        user_id: &str,
        kind: &str,
        content: &str,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<MemoryId, DispatchError> {
        let memories = self.memories_for(user_id);
        let id = MemoryId::new();
        memories.lock().push(MemoryVector {
            id,
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            embedding,
            created_at: Utc::now(),
            metadata,
        });
        Ok(id)
    }

    async fn similarity_search(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, DispatchError> {
        let memories = self.memories_for(user_id);
        let memories = memories.lock();
        let mut hits: Vec<SimilarityHit> = memories
            .iter()
            .map(|m| SimilarityHit {
                content: m.content.clone(),
                similarity: cosine_similarity(query_embedding, &m.embedding),
                created_at: m.created_at,
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_fetch_round_trip_in_reverse_order() {
        let store = InMemoryStore::new();
        store
            .append_turn("u1", Role::User, "hi", Mode::Chat, "agent")
            .await
            .unwrap();
        store
            .append_turn("u1", Role::Assistant, "hello", Mode::Chat, "agent")
            .await
            .unwrap();
        let recent = store.fetch_recent_turns("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "hello");
        assert_eq!(recent[1].content, "hi");
    }

    #[tokio::test]
    async fn count_turns_filters_by_mode() {
        let store = InMemoryStore::new();
        store
            .append_turn("u1", Role::User, "hi", Mode::Chat, "agent")
            .await
            .unwrap();
        store
            .append_turn("u1", Role::User, "eval-only", Mode::Eval, "agent")
            .await
            .unwrap();
        assert_eq!(store.count_turns_for_mode("u1", Mode::Chat).await.unwrap(), 1);
        assert_eq!(store.count_turns_for_mode("u1", Mode::Eval).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn similarity_search_ranks_by_cosine() {
        let store = InMemoryStore::new();
        store
            .store_memory_vector("u1", "summary", "a", vec![1.0, 0.0], serde_json::json!({}))
            .await
            .unwrap();
        store
            .store_memory_vector("u1", "summary", "b", vec![0.0, 1.0], serde_json::json!({}))
            .await
            .unwrap();
        let hits = store.similarity_search("u1", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "a");
    }
}
