pub mod memory;
pub mod remote;
pub mod store;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::backend::ApiClient;
use crate::cli::Args;
use crate::config::ConfigError;
use crate::error::SyncResult;
use crate::models::chat::{ Conversation, ConversationSummary };

pub use store::ConversationStore;

/// Where conversations are mirrored. Implementations only move whole
/// conversations; merging and fallbacks live in `ConversationStore`.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// `Ok(None)` when the store has never seen `id`.
    async fn fetch(&self, id: &str) -> SyncResult<Option<Conversation>>;

    async fn list(&self) -> SyncResult<Vec<ConversationSummary>>;

    /// Full overwrite of the stored copy.
    async fn save(&self, conversation: &Conversation) -> SyncResult<()>;

    async fn delete(&self, id: &str) -> SyncResult<()>;
}

pub fn create_history_store(
    args: &Args,
    api: &ApiClient
) -> Result<Arc<dyn HistoryStore>, ConfigError> {
    match args.history_type.to_lowercase().as_str() {
        "remote" => Ok(Arc::new(remote::RemoteHistoryStore::new(api.clone()))),
        "memory" => Ok(Arc::new(memory::MemoryHistoryStore::new())),
        other => Err(ConfigError::UnsupportedHistoryType(other.to_string())),
    }
}

pub fn initialize_history_store(
    args: &Args,
    api: &ApiClient
) -> Result<Arc<dyn HistoryStore>, ConfigError> {
    info!("Chat history will be stored in: {} at {}", args.history_type, api.base_url());
    create_history_store(args, api)
}
