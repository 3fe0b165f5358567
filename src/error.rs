use std::time::Duration;
use thiserror::Error;

pub const TIMEOUT_REPLY: &str = "Request timed out. The server took too long to respond.";
pub const TRANSPORT_REPLY: &str = "Cannot connect to the server. Please check your connection.";
pub const GENERIC_REPLY: &str =
    "Sorry, there was an error processing your request. Please try again.";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("Conversation '{0}' not found")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error ({status}): {message}")]
    ServerRejected {
        status: u16,
        message: String,
    },

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid response from server: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl SyncError {
    /// Text placed in the assistant bubble when a turn fails.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Timeout(_) => TIMEOUT_REPLY.to_string(),
            SyncError::Transport(_) => TRANSPORT_REPLY.to_string(),
            SyncError::ServerRejected { message, .. } if !message.trim().is_empty() => {
                format!("Error: {}", message)
            }
            SyncError::Io(detail) => format!("Error: {}", detail),
            _ => GENERIC_REPLY.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SyncError::Malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            return SyncError::ServerRejected {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        SyncError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Malformed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
