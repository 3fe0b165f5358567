use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Args ---
    /// Base URL of the chat backend (e.g., http://localhost:8000)
    #[arg(long, env = "API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    // --- History Store Args ---
    /// Where conversations are mirrored (remote, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "remote")]
    pub history_type: String,

    // --- Settings Args ---
    /// Local settings cache, used whenever the backend cannot be reached.
    #[arg(long, env = "SETTINGS_CACHE_PATH", default_value = ".ragchat/settings.json")]
    pub settings_cache: String,

    // --- Timeouts ---
    /// Seconds to wait for an assistant reply before giving up.
    #[arg(long, env = "REPLY_TIMEOUT_SECS", default_value = "300")]
    pub reply_timeout_secs: u64,

    /// Seconds to wait for code execution. No limit when unset.
    #[arg(long, env = "CODE_TIMEOUT_SECS")]
    pub code_timeout_secs: Option<u64>,

    // --- General App Args ---
    /// Conversation to open on startup.
    #[arg(long, env = "CHAT_ID")]
    pub chat_id: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn code_timeout(&self) -> Option<Duration> {
        self.code_timeout_secs.map(Duration::from_secs)
    }
}
