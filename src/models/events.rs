use serde::{ Serialize, Deserialize };
use tokio::sync::mpsc::{ self, UnboundedReceiver, UnboundedSender };

use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything the session tells the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "conversation_opened")] ConversationOpened {
        conversation: Conversation,
    },
    #[serde(rename = "message")] MessageRendered {
        conversation_id: String,
        message: ChatMessage,
    },
    #[serde(rename = "pending")] Pending {
        active: bool,
    },
    #[serde(rename = "title")] TitleChanged {
        conversation_id: String,
        title: String,
    },
    #[serde(rename = "roster")] RosterChanged {
        roster: Vec<ConversationSummary>,
    },
    #[serde(rename = "cleared")] ConversationCleared {
        conversation_id: String,
    },
    #[serde(rename = "deleted")] ConversationDeleted {
        conversation_id: String,
    },
    #[serde(rename = "toast")] Toast {
        level: ToastLevel,
        title: String,
        message: String,
    },
}

/// Sending half handed to the store and the session. A dropped receiver is
/// not an error; events are simply discarded.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Option<UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn toast(&self, level: ToastLevel, title: &str, message: impl Into<String>) {
        self.emit(SessionEvent::Toast {
            level,
            title: title.to_string(),
            message: message.into(),
        });
    }
}
