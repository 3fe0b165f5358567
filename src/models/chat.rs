use chrono::{ DateTime, NaiveDateTime, Utc };
use serde::{ Serialize, Deserialize };
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

use crate::error::SyncError;

pub const DEFAULT_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Older clients wrote `bot`, the backend logs failures as `system`.
    fn from_wire(role: &str) -> Role {
        match role.trim().to_lowercase().as_str() {
            "user" => Role::User,
            _ => Role::Assistant,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "timestamp")]
    pub last_modified: i64,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(new_conversation_id(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            last_modified: Utc::now().timestamp_millis(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.touch();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now().timestamp_millis();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

/// Sidebar entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
}

/// Millisecond clock in base 36 followed by a random suffix.
pub fn new_conversation_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", to_base36(millis), &suffix[..10])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Title for a conversation whose first message is `message`.
pub fn derive_title(message: &str) -> String {
    let trimmed = message.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

// --- Wire shapes -----------------------------------------------------------
//
// The backend answers with `conversation_id` from its own tables and `id` from
// what this client saved; timestamps arrive as epoch millis or ISO strings.

#[derive(Deserialize, Debug, Default)]
pub(crate) struct WireMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<JsonValue>,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct WireConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    messages: Option<Vec<WireMessage>>,
    #[serde(default)]
    timestamp: Option<JsonValue>,
    #[serde(default)]
    updated_at: Option<JsonValue>,
}

impl WireConversation {
    fn resolved_id(&self) -> Option<String> {
        self.id
            .as_deref()
            .or(self.conversation_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    fn resolved_title(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string()
    }

    pub(crate) fn into_conversation(self) -> Result<Conversation, SyncError> {
        let id = self
            .resolved_id()
            .ok_or_else(|| SyncError::Malformed("conversation without id".to_string()))?;
        let title = self.resolved_title();
        let last_modified = self.timestamp
            .as_ref()
            .or(self.updated_at.as_ref())
            .and_then(parse_timestamp)
            .unwrap_or(0);
        let messages = self.messages
            .unwrap_or_default()
            .into_iter()
            .map(|msg| ChatMessage {
                role: Role::from_wire(&msg.role),
                content: msg.content,
                timestamp: msg.timestamp.as_ref().and_then(parse_timestamp).unwrap_or(last_modified),
            })
            .collect();

        Ok(Conversation { id, title, messages, last_modified })
    }

    pub(crate) fn into_summary(self) -> Option<ConversationSummary> {
        let title = self.resolved_title();
        self.resolved_id().map(|id| ConversationSummary { id, title })
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc().timestamp_millis())
        }
        _ => None,
    }
}
