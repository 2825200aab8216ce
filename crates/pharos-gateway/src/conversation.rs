//! Conversation history: append-only messages keyed by conversation id
//!
//! The store trait is the seam to an external persistence layer; the
//! in-memory implementation backs tests and single-process deployments.
//! Durability is out of scope here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pharos_ai::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One message in a conversation; immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// An ordered conversation plus accounting metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ConversationMessage>,
    /// Cumulative token count across turns
    pub total_tokens: u64,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence interface for conversations. Mutation is append-only:
/// messages are never edited or reordered.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a fresh conversation
    async fn create(&self, metadata: HashMap<String, String>) -> Result<Conversation>;

    /// Fetch a conversation by id
    async fn get(&self, id: &str) -> Result<Conversation>;

    /// Append a message
    async fn add_message(&self, id: &str, message: ConversationMessage) -> Result<()>;

    /// The most recent messages, oldest first, for prompt assembly
    async fn messages_for_context(&self, id: &str, limit: usize)
    -> Result<Vec<ConversationMessage>>;

    /// Add to the cumulative token count
    async fn record_usage(&self, id: &str, tokens: u32) -> Result<()>;

    /// Remove a conversation entirely
    async fn delete(&self, id: &str) -> Result<()>;

    /// Ids of all stored conversations
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-process store backed by a map
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create(&self, metadata: HashMap<String, String>) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            total_tokens: 0,
            metadata,
            created_at: Utc::now(),
        };
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownConversation(id.to_string()))
    }

    async fn add_message(&self, id: &str, message: ConversationMessage) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| Error::UnknownConversation(id.to_string()))?;
        conversation.messages.push(message);
        Ok(())
    }

    async fn messages_for_context(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let conversations = self.conversations.read();
        let conversation = conversations
            .get(id)
            .ok_or_else(|| Error::UnknownConversation(id.to_string()))?;
        let start = conversation.messages.len().saturating_sub(limit);
        Ok(conversation.messages[start..].to_vec())
    }

    async fn record_usage(&self, id: &str, tokens: u32) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| Error::UnknownConversation(id.to_string()))?;
        conversation.total_tokens += tokens as u64;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conversations.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.conversations.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStore::new();
        let conversation = store.create(HashMap::new()).await.unwrap();
        let fetched = store.get(&conversation.id).await.unwrap();
        assert_eq!(fetched.id, conversation.id);
        assert!(fetched.messages.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_fails() {
        let store = InMemoryStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownConversation(_)));
    }

    #[tokio::test]
    async fn test_messages_keep_append_order() {
        let store = InMemoryStore::new();
        let conversation = store.create(HashMap::new()).await.unwrap();
        for i in 0..5 {
            store
                .add_message(
                    &conversation.id,
                    ConversationMessage::new(Role::User, format!("msg {}", i)),
                )
                .await
                .unwrap();
        }
        let messages = store
            .messages_for_context(&conversation.id, 100)
            .await
            .unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_context_limit_keeps_most_recent() {
        let store = InMemoryStore::new();
        let conversation = store.create(HashMap::new()).await.unwrap();
        for i in 0..10 {
            store
                .add_message(
                    &conversation.id,
                    ConversationMessage::new(Role::User, format!("msg {}", i)),
                )
                .await
                .unwrap();
        }
        let messages = store
            .messages_for_context(&conversation.id, 3)
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg 7");
        assert_eq!(messages[2].content, "msg 9");
    }

    #[tokio::test]
    async fn test_record_usage_accumulates() {
        let store = InMemoryStore::new();
        let conversation = store.create(HashMap::new()).await.unwrap();
        store.record_usage(&conversation.id, 120).await.unwrap();
        store.record_usage(&conversation.id, 80).await.unwrap();
        assert_eq!(store.get(&conversation.id).await.unwrap().total_tokens, 200);
    }

    #[tokio::test]
    async fn test_delete_then_list() {
        let store = InMemoryStore::new();
        let conversation = store.create(HashMap::new()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.delete(&conversation.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        // Deleting again is fine.
        store.delete(&conversation.id).await.unwrap();
    }
}
