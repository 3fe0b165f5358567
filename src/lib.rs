pub mod assistant;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod history;
pub mod models;
pub mod repl;
pub mod runner;
pub mod session;

use assistant::RemoteAssistant;
use backend::ApiClient;
use cli::Args;
use config::SettingsManager;
use history::{ initialize_history_store, ConversationStore };
use log::info;
use models::events::EventSink;
use repl::{ spawn_event_printer, Repl };
use runner::CodeRunner;
use session::ChatSession;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("API URL: {}", args.api_url);
    info!("History Store Type: {}", args.history_type);
    info!("Settings Cache: {}", args.settings_cache);
    info!("Reply Timeout: {}s", args.reply_timeout_secs);
    match args.code_timeout_secs {
        Some(secs) => info!("Code Timeout: {}s", secs),
        None => info!("Code Timeout: none"),
    }
    if let Some(chat_id) = &args.chat_id {
        info!("Startup Chat: {}", chat_id);
    }
    info!("-------------------------");

    let api = ApiClient::new(&args.api_url)?;
    let (events, rx) = EventSink::channel();
    let printer = spawn_event_printer(rx);

    let settings = SettingsManager::new(api.clone(), &args.settings_cache, events.clone());
    settings.load().await;

    let history = initialize_history_store(&args, &api)?;
    let store = ConversationStore::new(history, settings.handle(), events.clone());
    let assistant = Arc::new(RemoteAssistant::new(api.clone()));
    let mut session = ChatSession::new(
        store,
        assistant,
        settings.handle(),
        events
    ).with_reply_timeout(args.reply_timeout());

    if let Some(chat_id) = &args.chat_id {
        session.open_chat(chat_id).await;
    }
    session.refresh_roster().await;

    let runner = CodeRunner::new(api, args.code_timeout());
    let mut repl = Repl::new(session, runner, settings);
    let result = repl.run().await;

    drop(repl);
    printer.await?;
    result
}
