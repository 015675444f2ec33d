//! Conversation message assembly and the bounded per-user history ring.

use crate::types::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Rough token estimate; used only for logging, not for admission decisions.
    pub fn estimate_tokens(&self) -> usize {
        self.content.len() / 4 + 1
    }
}

/// An ordered list of messages, used both as the bounded per-user history ring
/// (C3) and as the assembled payload handed to `LlmClient::chat_completion`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.estimate_tokens()).sum()
    }

    /// Drop messages from the head until at most `max_len` remain.
    pub fn truncate_front(&mut self, max_len: usize) {
        if self.messages.len() > max_len {
            let excess = self.messages.len() - max_len;
            self.messages.drain(0..excess);
        }
    }

    pub fn to_openai_messages(&self) -> Vec<serde_json::Value> {
        self.messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.to_string(), "content": m.content }))
            .collect()
    }
}

/// Renders recent history, retrieved long-term context, and the current user
/// turn into the flat prompt layout C4 assembles. Each section is included
/// only when non-empty.
pub fn assemble_prompt(
    history: &[ConversationMessage],
    retrieved_context: Option<&str>,
    user_message: &str,
) -> String {
    let mut sections = Vec::new();

    if !history.is_empty() {
        let mut block = String::from("Recent conversation history:\n");
        for message in history {
            block.push_str(&format!("{}: {}\n", message.role, message.content));
        }
        sections.push(block.trim_end().to_string());
    }

    if let Some(context) = retrieved_context {
        if !context.trim().is_empty() {
            sections.push(format!(
                "Previous relevant context from our conversations:\n{}",
                context.trim()
            ));
        }
    }

    sections.push(format!("User: {}\nAssistant:", user_message));

    sections.join("\n\n")
}
