use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use crate::backend::{ ensure_success, read_json, ApiClient };
use crate::error::SyncResult;
use crate::history::HistoryStore;
use crate::models::chat::{ Conversation, ConversationSummary, WireConversation };

/// Conversations kept by the backend under `/db/*`.
pub struct RemoteHistoryStore {
    api: ApiClient,
}

impl RemoteHistoryStore {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl HistoryStore for RemoteHistoryStore {
    async fn fetch(&self, id: &str) -> SyncResult<Option<Conversation>> {
        let url = self.api.endpoint(&["db", "get-chat", id])?;
        let resp = self.api.http().get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("Conversation {} not found on server", id);
            return Ok(None);
        }
        let wire: WireConversation = read_json(ensure_success(resp).await?).await?;
        Ok(Some(wire.into_conversation()?))
    }

    async fn list(&self) -> SyncResult<Vec<ConversationSummary>> {
        let rows: Vec<WireConversation> = self.api.get_json(&["db", "get-all-chats"]).await?;
        Ok(rows.into_iter().filter_map(WireConversation::into_summary).collect())
    }

    async fn save(&self, conversation: &Conversation) -> SyncResult<()> {
        let body = serde_json::to_value(conversation)?;
        let _: JsonValue = self.api.post_json(&["db", "save-chat"], &body).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let url = self.api.endpoint(&["db", "delete-chat", id])?;
        ensure_success(self.api.http().delete(url).send().await?).await?;
        Ok(())
    }
}
