pub mod settings;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock as TokioRwLock;

use crate::models::settings::Settings;

pub use settings::SettingsManager;

/// Process-wide settings, read fresh at the start of every send.
pub type SettingsHandle = Arc<TokioRwLock<Settings>>;

pub fn shared_settings(settings: Settings) -> SettingsHandle {
    Arc::new(TokioRwLock::new(settings))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(String),

    #[error("Unsupported history store type: {0}")]
    UnsupportedHistoryType(String),
}
