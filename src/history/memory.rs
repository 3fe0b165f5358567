use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock as TokioRwLock;

use crate::error::SyncResult;
use crate::history::HistoryStore;
use crate::models::chat::{ Conversation, ConversationSummary };

/// In-process stand-in for the backend, used offline and in tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    conversations: TokioRwLock<HashMap<String, Conversation>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn fetch(&self, id: &str) -> SyncResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    /// Most recently modified first.
    async fn list(&self) -> SyncResult<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().await;
        let mut all: Vec<&Conversation> = conversations.values().collect();
        all.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().map(Conversation::summary).collect())
    }

    async fn save(&self, conversation: &Conversation) -> SyncResult<()> {
        self.conversations.write().await.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        self.conversations.write().await.remove(id);
        Ok(())
    }
}
