use log::{ debug, info, warn, error };
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SettingsHandle;
use crate::error::{ SyncError, SyncResult };
use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary, DEFAULT_TITLE };
use crate::models::events::{ EventSink, SessionEvent, ToastLevel };

/// Owner of every conversation touched in this session and of the roster.
///
/// The history backend is a mirror. Mutations are read-modify-write without
/// revision checks: the local copy is applied first and written back whole,
/// so when the two disagree the local copy wins and is re-pushed.
pub struct ConversationStore {
    history: Arc<dyn HistoryStore>,
    settings: SettingsHandle,
    events: EventSink,
    local: HashMap<String, Conversation>,
    roster: Vec<ConversationSummary>,
}

impl ConversationStore {
    pub fn new(history: Arc<dyn HistoryStore>, settings: SettingsHandle, events: EventSink) -> Self {
        Self {
            history,
            settings,
            events,
            local: HashMap::new(),
            roster: Vec::new(),
        }
    }

    pub fn local(&self, id: &str) -> Option<&Conversation> {
        self.local.get(id)
    }

    pub fn message_count(&self, id: &str) -> usize {
        self.local.get(id).map_or(0, |c| c.messages.len())
    }

    pub fn roster(&self) -> &[ConversationSummary] {
        &self.roster
    }

    async fn save_history(&self) -> bool {
        self.settings.read().await.save_history
    }

    /// Starts a conversation and saves it right away. A failed save leaves
    /// the conversation usable locally and raises a warning.
    pub async fn create(&mut self, title: &str) -> Conversation {
        let title = if title.trim().is_empty() { DEFAULT_TITLE } else { title };
        let conversation = Conversation::new(title);
        info!("Created conversation {}", conversation.id);

        self.local.insert(conversation.id.clone(), conversation.clone());
        self.roster_insert_front(conversation.summary());

        if let Err(e) = self.persist(&conversation.id).await {
            warn!("Conversation {} only exists locally: {}", conversation.id, e);
            self.events.toast(
                ToastLevel::Warning,
                "Warning",
                format!("Failed to save chat: {}", e)
            );
        }
        conversation
    }

    /// `None` means the conversation exists nowhere. Fetch failures are
    /// reported to the user and also resolve to `None` unless a local copy
    /// exists.
    pub async fn get(&mut self, id: &str) -> Option<Conversation> {
        if !self.save_history().await {
            return self.local.get(id).cloned();
        }

        match self.history.fetch(id).await {
            Ok(Some(remote)) => {
                if let Some(local) = self.local.get(id) {
                    if local.messages != remote.messages || local.title != remote.title {
                        debug!("Conversation {} differs from server copy, keeping local", id);
                    }
                    return Some(local.clone());
                }
                self.local.insert(id.to_string(), remote.clone());
                Some(remote)
            }
            Ok(None) => {
                let local = self.local.get(id).cloned();
                if local.is_none() {
                    info!("Conversation {} not found", id);
                }
                local
            }
            Err(e) => {
                error!("Error loading conversation {}: {}", id, e);
                self.events.toast(ToastLevel::Error, "Error", format!("Failed to load chat: {}", e));
                self.local.get(id).cloned()
            }
        }
    }

    /// Remote roster with conversations that only exist locally in front.
    /// Never fails; a broken backend yields an empty list.
    pub async fn list_all(&mut self) -> Vec<ConversationSummary> {
        if !self.save_history().await {
            debug!("History saving disabled, listing local conversations only");
            let mut locals: Vec<&Conversation> = self.local.values().collect();
            locals.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
            self.roster = locals.into_iter().map(Conversation::summary).collect();
            self.emit_roster();
            return self.roster.clone();
        }

        match self.history.list().await {
            Ok(remote) => {
                let mut roster: Vec<ConversationSummary> = self.roster
                    .iter()
                    .filter(|s| self.local.contains_key(&s.id) && !remote.iter().any(|r| r.id == s.id))
                    .cloned()
                    .collect();
                for summary in remote {
                    let title = self.local
                        .get(&summary.id)
                        .map(|c| c.title.clone())
                        .unwrap_or(summary.title);
                    roster.push(ConversationSummary { id: summary.id, title });
                }
                self.roster = roster;
                self.emit_roster();
                self.roster.clone()
            }
            Err(e) => {
                warn!("Failed to load chat history: {}", e);
                Vec::new()
            }
        }
    }

    /// Appends locally, then writes the whole conversation back. An id the
    /// backend does not know is created with this message as its content.
    /// The local append always happens; `Err` reports a failed remote write.
    pub async fn append_message(&mut self, id: &str, message: ChatMessage) -> SyncResult<()> {
        let readable = self.prepare_update(id).await;
        if let Some(conversation) = self.local.get_mut(id) {
            conversation.push(message);
        }
        self.finish_update(id, readable, "Failed to save chat").await
    }

    /// Empties the message list and keeps the title. Safe to repeat, and
    /// self-healing for ids the backend has never seen.
    pub async fn clear_messages(&mut self, id: &str) -> SyncResult<()> {
        let readable = self.prepare_update(id).await;
        if let Some(conversation) = self.local.get_mut(id) {
            conversation.clear();
        }
        self.events.emit(SessionEvent::ConversationCleared { conversation_id: id.to_string() });
        self.finish_update(id, readable, "Failed to clear chat").await
    }

    /// Updates only the title. Unknown ids are left alone.
    pub async fn rename(&mut self, id: &str, title: &str) -> SyncResult<()> {
        if !self.local.contains_key(id) && self.save_history().await {
            match self.history.fetch(id).await {
                Ok(Some(remote)) => {
                    self.local.insert(id.to_string(), remote);
                }
                Ok(None) => {
                    warn!("Cannot rename unknown conversation {}", id);
                    return Ok(());
                }
                Err(e) => {
                    error!("Error loading conversation {} for rename: {}", id, e);
                    self.events.toast(ToastLevel::Error, "Error", "Failed to update chat title");
                    return Err(e);
                }
            }
        }

        let Some(conversation) = self.local.get_mut(id) else {
            warn!("Cannot rename unknown conversation {}", id);
            return Ok(());
        };
        conversation.title = title.to_string();
        conversation.touch();

        match self.roster.iter_mut().find(|s| s.id == id) {
            Some(entry) => entry.title = title.to_string(),
            None => self.roster.insert(0, ConversationSummary { id: id.to_string(), title: title.to_string() }),
        }
        self.events.emit(SessionEvent::TitleChanged {
            conversation_id: id.to_string(),
            title: title.to_string(),
        });
        self.emit_roster();

        if let Err(e) = self.persist(id).await {
            error!("Failed to update title of {}: {}", id, e);
            self.events.toast(ToastLevel::Error, "Error", "Failed to update chat title");
            return Err(e);
        }
        Ok(())
    }

    /// Removes the conversation from the backend. Does nothing at all while
    /// history saving is off, which is reported as `Ok(false)`.
    pub async fn delete(&mut self, id: &str) -> SyncResult<bool> {
        if !self.save_history().await {
            debug!("History saving disabled, not deleting {}", id);
            return Ok(false);
        }

        match self.history.delete(id).await {
            Ok(()) => {
                info!("Deleted conversation {}", id);
                self.local.remove(id);
                self.roster.retain(|s| s.id != id);
                self.events.emit(SessionEvent::ConversationDeleted { conversation_id: id.to_string() });
                self.list_all().await;
                Ok(true)
            }
            Err(e) => {
                error!("Error deleting conversation {}: {}", id, e);
                self.events.toast(ToastLevel::Error, "Error", "Failed to delete chat");
                Err(e)
            }
        }
    }

    /// Appends to the local copy only. Used for replies that must be shown
    /// but never saved, such as error descriptions.
    pub fn record_local(&mut self, id: &str, message: ChatMessage) {
        self.local
            .entry(id.to_string())
            .or_insert_with(|| Conversation::with_id(id, DEFAULT_TITLE))
            .push(message);
    }

    /// Read step of read-modify-write. Afterwards a local copy of `id`
    /// exists. Returns `false` when the backend could not be read and there
    /// was no local copy, in which case the result must not be written back.
    async fn prepare_update(&mut self, id: &str) -> bool {
        let remote = if self.save_history().await {
            Some(self.history.fetch(id).await)
        } else {
            None
        };

        if let Some(local) = self.local.get(id) {
            match remote {
                Some(Ok(Some(remote))) if remote.messages.len() != local.messages.len() => {
                    warn!(
                        "Conversation {} drifted ({} local / {} remote messages), local copy wins",
                        id,
                        local.messages.len(),
                        remote.messages.len()
                    );
                }
                Some(Ok(None)) => info!("Conversation {} missing on server, re-creating", id),
                Some(Err(e)) => warn!("Could not read conversation {} before update: {}", id, e),
                _ => {}
            }
            return true;
        }

        let (conversation, readable) = match remote {
            Some(Ok(Some(remote))) => (remote, true),
            Some(Ok(None)) | None => {
                info!("Conversation {} unknown, creating it", id);
                (Conversation::with_id(id, DEFAULT_TITLE), true)
            }
            Some(Err(e)) => {
                warn!("Could not read conversation {}, keeping change local: {}", id, e);
                (Conversation::with_id(id, DEFAULT_TITLE), false)
            }
        };
        if !self.roster.iter().any(|s| s.id == id) {
            self.roster_insert_front(conversation.summary());
        }
        self.local.insert(id.to_string(), conversation);
        readable
    }

    async fn finish_update(&mut self, id: &str, readable: bool, failure: &str) -> SyncResult<()> {
        let result = if readable {
            self.persist(id).await
        } else {
            Err(SyncError::Transport(format!("conversation {} could not be read", id)))
        };
        if let Err(e) = &result {
            warn!("{} {}: {}", failure, id, e);
            self.events.toast(ToastLevel::Warning, "Warning", format!("{}: {}", failure, e));
        }
        result
    }

    async fn persist(&self, id: &str) -> SyncResult<()> {
        if !self.save_history().await {
            return Ok(());
        }
        let Some(conversation) = self.local.get(id) else {
            return Err(SyncError::NotFound(id.to_string()));
        };
        self.history.save(conversation).await
    }

    fn roster_insert_front(&mut self, summary: ConversationSummary) {
        self.roster.retain(|s| s.id != summary.id);
        self.roster.insert(0, summary);
        self.emit_roster();
    }

    fn emit_roster(&self) {
        self.events.emit(SessionEvent::RosterChanged { roster: self.roster.clone() });
    }
}
