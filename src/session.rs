use log::{ debug, info, warn, error };
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::assistant::{ AssistantClient, ChatRequest, DocumentEntry };
use crate::config::SettingsHandle;
use crate::error::{ SyncError, SyncResult };
use crate::history::ConversationStore;
use crate::models::chat::{ derive_title, ChatMessage, Conversation, ConversationSummary, DEFAULT_TITLE };
use crate::models::events::{ EventSink, SessionEvent, ToastLevel };

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingReply,
}

/// Which conversation is on screen and whether a reply is pending. Only
/// `ChatSession` mutates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub current_id: Option<String>,
    pub state: TurnState,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self { current_id: None, state: TurnState::Idle }
    }
}

/// Per-message adjustments on top of the live settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOverrides {
    pub system_prompt: Option<String>,
    pub use_documents: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    /// Blank input, nothing happened.
    Ignored,
    Replied(String),
    Failed(SyncError),
}

pub struct ChatSession {
    store: ConversationStore,
    assistant: Arc<dyn AssistantClient>,
    settings: SettingsHandle,
    events: EventSink,
    context: SessionContext,
    reply_timeout: Duration,
}

impl ChatSession {
    pub fn new(
        store: ConversationStore,
        assistant: Arc<dyn AssistantClient>,
        settings: SettingsHandle,
        events: EventSink
    ) -> Self {
        Self {
            store,
            assistant,
            settings,
            events,
            context: SessionContext::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.context.current_id.as_deref().and_then(|id| self.store.local(id))
    }

    pub async fn submit_user_message(&mut self, text: &str) -> TurnOutcome {
        self.submit_with(text, SendOverrides::default()).await
    }

    /// One full turn: the user message is shown and saved, then the
    /// assistant is asked and its reply (or a description of the failure) is
    /// shown. Always ends in `Idle`.
    pub async fn submit_with(&mut self, text: &str, overrides: SendOverrides) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Ignored;
        }

        let id = self.ensure_conversation().await;
        let user_message = ChatMessage::user(text);
        self.render(&id, &user_message);
        if let Err(e) = self.store.append_message(&id, user_message).await {
            debug!("User message kept locally only: {}", e);
        }

        if self.store.message_count(&id) == 1 {
            let title = derive_title(text);
            if let Err(e) = self.store.rename(&id, &title).await {
                debug!("Title kept locally only: {}", e);
            }
        }

        self.context.state = TurnState::AwaitingReply;
        self.events.emit(SessionEvent::Pending { active: true });

        let request = self.build_request(&id, text, &overrides).await;
        let result = match timeout(self.reply_timeout, self.assistant.chat(&request)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.reply_timeout)),
        };

        self.events.emit(SessionEvent::Pending { active: false });

        let outcome = match result {
            Ok(reply) => {
                if let Some(chat_id) = reply.chat_id.as_deref().filter(|c| *c != id) {
                    warn!("Server answered for chat {} while {} was active", chat_id, id);
                }
                let message = ChatMessage::assistant(reply.response.clone());
                self.render(&id, &message);
                if let Err(e) = self.store.append_message(&id, message).await {
                    debug!("Reply kept locally only: {}", e);
                }
                TurnOutcome::Replied(reply.response)
            }
            Err(e) => {
                error!("Assistant turn failed for {}: {}", id, e);
                let message = ChatMessage::assistant(e.user_message());
                self.render(&id, &message);
                self.store.record_local(&id, message);
                self.events.toast(ToastLevel::Error, "Error", e.to_string());
                TurnOutcome::Failed(e)
            }
        };

        self.context.state = TurnState::Idle;
        outcome
    }

    /// Settings are read here, per send, so a change applies to the next
    /// message and never to one already in flight.
    async fn build_request(&self, id: &str, text: &str, overrides: &SendOverrides) -> ChatRequest {
        let settings = self.settings.read().await;
        let system_prompt = overrides.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| settings.effective_system_prompt())
            .to_string();

        ChatRequest {
            message: text.to_string(),
            chat_id: id.to_string(),
            use_docs: settings.use_documents || overrides.use_documents,
            system_prompt,
        }
    }

    async fn ensure_conversation(&mut self) -> String {
        if let Some(id) = &self.context.current_id {
            return id.clone();
        }
        self.start_new_chat().await.id
    }

    pub async fn start_new_chat(&mut self) -> Conversation {
        let conversation = self.store.create(DEFAULT_TITLE).await;
        self.activate(&conversation);
        conversation
    }

    /// Switches to `id`. A conversation that exists nowhere is replaced by a
    /// fresh one.
    pub async fn open_chat(&mut self, id: &str) -> Conversation {
        match self.store.get(id).await {
            Some(conversation) => {
                info!("Opened conversation {}", id);
                self.activate(&conversation);
                conversation
            }
            None => {
                info!("Conversation {} not found, starting a new one", id);
                self.start_new_chat().await
            }
        }
    }

    pub async fn clear_current(&mut self) -> SyncResult<()> {
        match self.context.current_id.clone() {
            Some(id) => self.store.clear_messages(&id).await,
            None => Ok(()),
        }
    }

    pub async fn rename_current(&mut self, title: &str) -> SyncResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(());
        }
        match self.context.current_id.clone() {
            Some(id) => self.store.rename(&id, title).await,
            None => Ok(()),
        }
    }

    pub async fn delete_current(&mut self) -> SyncResult<()> {
        let Some(id) = self.context.current_id.clone() else {
            return Ok(());
        };
        if self.store.delete(&id).await? {
            self.context.current_id = None;
        }
        Ok(())
    }

    /// Reads `path` and sends it to the document endpoint. The attempt and
    /// its outcome are both saved to the conversation.
    pub async fn upload_document(&mut self, path: &Path) -> SyncResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Cannot read {}: {}", path.display(), e);
                self.events.toast(ToastLevel::Error, "Error", format!("Cannot read {}: {}", file_name, e));
                return Err(SyncError::from(e));
            }
        };

        let id = self.ensure_conversation().await;
        let announcement = ChatMessage::user(format!("Uploading document: {}", file_name));
        self.render(&id, &announcement);
        if let Err(e) = self.store.append_message(&id, announcement).await {
            debug!("Upload announcement kept locally only: {}", e);
        }

        self.context.state = TurnState::AwaitingReply;
        self.events.emit(SessionEvent::Pending { active: true });
        let result = self.assistant.upload(&file_name, bytes).await;
        self.events.emit(SessionEvent::Pending { active: false });
        self.context.state = TurnState::Idle;

        let (reply, outcome) = match result {
            Ok(_) => {
                info!("Uploaded {}", file_name);
                self.events.toast(ToastLevel::Success, "Success", format!("{} uploaded", file_name));
                (
                    format!(
                        "Document uploaded and processed successfully. You can now ask questions about {}.",
                        file_name
                    ),
                    Ok(()),
                )
            }
            Err(e) => {
                error!("Upload of {} failed: {}", file_name, e);
                let detail = failure_detail(&e);
                self.events.toast(ToastLevel::Error, "Error", detail.clone());
                (format!("Error uploading document: {}", detail), Err(e))
            }
        };

        let message = ChatMessage::assistant(reply);
        self.render(&id, &message);
        if let Err(e) = self.store.append_message(&id, message).await {
            debug!("Upload outcome kept locally only: {}", e);
        }
        outcome
    }

    pub async fn refresh_roster(&mut self) -> Vec<ConversationSummary> {
        self.store.list_all().await
    }

    pub async fn list_documents(&self) -> SyncResult<Vec<DocumentEntry>> {
        match self.assistant.list_documents().await {
            Ok(documents) => Ok(documents),
            Err(e) => {
                error!("Error loading documents: {}", e);
                self.events.toast(ToastLevel::Error, "Error", "Failed to load documents");
                Err(e)
            }
        }
    }

    pub async fn delete_document(&self, id: &str) -> SyncResult<()> {
        match self.assistant.delete_document(id).await {
            Ok(()) => {
                self.events.toast(ToastLevel::Success, "Success", "Document deleted successfully.");
                Ok(())
            }
            Err(e) => {
                error!("Error deleting document {}: {}", id, e);
                self.events.toast(
                    ToastLevel::Error,
                    "Error",
                    format!("Error deleting document: {}", failure_detail(&e))
                );
                Err(e)
            }
        }
    }

    pub async fn delete_all_documents(&self) -> SyncResult<()> {
        match self.assistant.delete_all_documents().await {
            Ok(()) => {
                self.events.toast(ToastLevel::Success, "Success", "All documents deleted successfully");
                Ok(())
            }
            Err(e) => {
                error!("Error deleting all documents: {}", e);
                self.events.toast(
                    ToastLevel::Error,
                    "Error",
                    format!("Failed to delete documents: {}", failure_detail(&e))
                );
                Err(e)
            }
        }
    }

    fn activate(&mut self, conversation: &Conversation) {
        self.context.current_id = Some(conversation.id.clone());
        self.events.emit(SessionEvent::ConversationOpened { conversation: conversation.clone() });
    }

    fn render(&self, id: &str, message: &ChatMessage) {
        self.events.emit(SessionEvent::MessageRendered {
            conversation_id: id.to_string(),
            message: message.clone(),
        });
    }
}

/// Server-provided text when there is one, otherwise the error itself.
fn failure_detail(e: &SyncError) -> String {
    match e {
        SyncError::ServerRejected { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
