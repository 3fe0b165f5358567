use futures::StreamExt;
use log::{ debug, info };
use std::error::Error;
use std::path::PathBuf;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::SettingsManager;
use crate::format::{ render, runnable_blocks, ContentSegment };
use crate::models::chat::{ ChatMessage, Role };
use crate::models::events::{ SessionEvent, ToastLevel };
use crate::models::settings::PartialSettings;
use crate::runner::{ CodeRunner, ExecutionResult };
use crate::session::ChatSession;

const COMMANDS: [&str; 12] = [
    "/new",
    "/list",
    "/open",
    "/rename",
    "/clear",
    "/delete",
    "/run",
    "/upload",
    "/docs",
    "/settings",
    "/help",
    "/quit",
];
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, PartialEq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    Rename(String),
    Clear,
    Delete,
    Run(usize),
    Upload(PathBuf),
    Documents,
    DeleteDocument(String),
    DeleteAllDocuments,
    Settings(Option<String>),
    Help,
    Quit,
    Invalid(String),
    Unknown {
        input: String,
        suggestion: Option<&'static str>,
    },
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if !line.starts_with('/') {
        return Command::Send(line.to_string());
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    match name {
        "/new" => Command::New,
        "/list" => Command::List,
        "/open" if !rest.is_empty() => Command::Open(rest.to_string()),
        "/open" => Command::Invalid("Usage: /open <id>".to_string()),
        "/rename" if !rest.is_empty() => Command::Rename(rest.to_string()),
        "/rename" => Command::Invalid("Usage: /rename <title>".to_string()),
        "/clear" => Command::Clear,
        "/delete" => Command::Delete,
        "/run" => {
            match rest {
                "" => Command::Run(1),
                n =>
                    match n.parse::<usize>() {
                        Ok(n) if n > 0 => Command::Run(n),
                        _ => Command::Invalid("Usage: /run [block number]".to_string()),
                    }
            }
        }
        "/upload" if !rest.is_empty() => Command::Upload(PathBuf::from(rest)),
        "/upload" => Command::Invalid("Usage: /upload <path>".to_string()),
        "/docs" => {
            match rest.split_once(char::is_whitespace) {
                _ if rest.is_empty() => Command::Documents,
                Some(("delete", id)) if id.trim() == "all" => Command::DeleteAllDocuments,
                Some(("delete", id)) => Command::DeleteDocument(id.trim().to_string()),
                _ => Command::Invalid("Usage: /docs [delete <id>|all]".to_string()),
            }
        }
        "/settings" => Command::Settings(Some(rest.to_string()).filter(|r| !r.is_empty())),
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown { input: other.to_string(), suggestion: suggest(other) },
    }
}

fn suggest(input: &str) -> Option<&'static str> {
    COMMANDS.iter()
        .map(|cmd| (*cmd, strsim::jaro_winkler(input, cmd)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(cmd, _)| cmd)
}

/// Console line for an event, if it deserves one.
pub fn describe_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::ConversationOpened { conversation } => {
            let mut out = format!("== {} ({}) ==", conversation.title, conversation.id);
            for message in &conversation.messages {
                out.push('\n');
                out.push_str(&describe_message(message));
            }
            Some(out)
        }
        SessionEvent::MessageRendered { message, .. } if message.role == Role::Assistant => {
            Some(describe_message(message))
        }
        SessionEvent::MessageRendered { .. } => None,
        SessionEvent::Pending { active: true } => Some("... thinking".to_string()),
        SessionEvent::Pending { active: false } => None,
        SessionEvent::TitleChanged { title, .. } => Some(format!("[title] {}", title)),
        SessionEvent::RosterChanged { .. } => None,
        SessionEvent::ConversationCleared { .. } => Some("[chat cleared]".to_string()),
        SessionEvent::ConversationDeleted { conversation_id } => {
            Some(format!("[deleted {}]", conversation_id))
        }
        SessionEvent::Toast { level, title, message } => {
            let tag = match level {
                ToastLevel::Info => "info",
                ToastLevel::Success => "ok",
                ToastLevel::Warning => "warn",
                ToastLevel::Error => "error",
            };
            Some(format!("[{}] {}: {}", tag, title, message))
        }
    }
}

fn describe_message(message: &ChatMessage) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut out = format!("{}: {}", speaker, message.content);

    let runnable = render(&message.content)
        .into_iter()
        .filter(|s| matches!(s, ContentSegment::FencedCode { runnable: true, .. }))
        .count();
    if runnable > 0 {
        out.push_str(&format!("\n  ({} runnable block(s), use /run <n>)", runnable));
    }
    out
}

/// Prints session events as they arrive until every sender is gone.
pub fn spawn_event_printer(rx: UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            if let Some(line) = describe_event(&event) {
                println!("{}", line);
            }
        }
    })
}

pub struct Repl {
    session: ChatSession,
    runner: CodeRunner,
    settings: SettingsManager,
}

impl Repl {
    pub fn new(session: ChatSession, runner: CodeRunner, settings: SettingsManager) -> Self {
        Self { session, runner, settings }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        println!("Type a message, or /help for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if !self.handle(parse_command(&line)).await {
                break;
            }
        }
        info!("Console session ended");
        Ok(())
    }

    /// Returns `false` once the user asked to quit.
    pub async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Send(text) => {
                self.session.submit_user_message(&text).await;
            }
            Command::New => {
                self.session.start_new_chat().await;
            }
            Command::List => {
                let roster = self.session.refresh_roster().await;
                if roster.is_empty() {
                    println!("No saved conversations.");
                }
                for (n, entry) in roster.iter().enumerate() {
                    println!("{:>3}. {}  [{}]", n + 1, entry.title, entry.id);
                }
            }
            Command::Open(id) => {
                self.session.open_chat(&id).await;
            }
            Command::Rename(title) => {
                if let Err(e) = self.session.rename_current(&title).await {
                    debug!("Rename failed: {}", e);
                }
            }
            Command::Clear => {
                if let Err(e) = self.session.clear_current().await {
                    debug!("Clear failed: {}", e);
                }
            }
            Command::Delete => {
                if let Err(e) = self.session.delete_current().await {
                    debug!("Delete failed: {}", e);
                }
            }
            Command::Run(n) => self.run_block(n).await,
            Command::Upload(path) => {
                if let Err(e) = self.session.upload_document(&path).await {
                    debug!("Upload failed: {}", e);
                }
            }
            Command::Documents => {
                if let Ok(documents) = self.session.list_documents().await {
                    if documents.is_empty() {
                        println!("No documents uploaded yet.");
                    }
                    for doc in &documents {
                        println!("  {}  [{}]", doc.filename, doc.id);
                    }
                }
            }
            Command::DeleteDocument(id) => {
                if let Err(e) = self.session.delete_document(&id).await {
                    debug!("Document delete failed: {}", e);
                }
            }
            Command::DeleteAllDocuments => {
                if let Err(e) = self.session.delete_all_documents().await {
                    debug!("Delete all documents failed: {}", e);
                }
            }
            Command::Settings(None) => {
                let settings = self.settings.snapshot().await;
                match serde_json::to_string_pretty(&settings) {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("Cannot display settings: {}", e),
                }
            }
            Command::Settings(Some(json)) => {
                match serde_json::from_str(&json).map(PartialSettings::from_json) {
                    Ok(Ok(partial)) => {
                        if let Err(e) = self.settings.update(partial).await {
                            debug!("Settings update failed: {}", e);
                        }
                    }
                    _ => println!("Usage: /settings {{\"temperature\": 0.9, ...}}"),
                }
            }
            Command::Help => {
                println!("Commands: {}", COMMANDS.join(", "));
            }
            Command::Quit => {
                return false;
            }
            Command::Invalid(usage) => println!("{}", usage),
            Command::Unknown { input, suggestion } => {
                match suggestion {
                    Some(cmd) => println!("Unknown command {}. Did you mean {}?", input, cmd),
                    None => println!("Unknown command {}. Type /help for commands.", input),
                }
            }
        }
        true
    }

    /// Runs the n-th python block of the latest assistant message that has one.
    async fn run_block(&self, n: usize) {
        if self.runner.is_busy() {
            println!("Code is already running.");
            return;
        }
        let blocks = self.session
            .current_conversation()
            .and_then(|c| {
                c.messages
                    .iter()
                    .rev()
                    .filter(|m| m.role == Role::Assistant)
                    .map(|m| runnable_blocks(&m.content))
                    .find(|blocks| !blocks.is_empty())
            })
            .unwrap_or_default();

        let Some(code) = n.checked_sub(1).and_then(|i| blocks.get(i)) else {
            println!("No runnable block {} in this conversation.", n);
            return;
        };
        match self.runner.execute(code).await {
            ExecutionResult::Output(output) => println!("{}", output),
            ExecutionResult::Error(error) => println!("[error] {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Conversation;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(parse_command("  hello  "), Command::Send("hello".into()));
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(parse_command("/open abc123"), Command::Open("abc123".into()));
        assert_eq!(parse_command("/rename  My notes "), Command::Rename("My notes".into()));
        assert_eq!(parse_command("/run"), Command::Run(1));
        assert_eq!(parse_command("/run 2"), Command::Run(2));
        assert_eq!(parse_command("/upload ./a b.pdf"), Command::Upload(PathBuf::from("./a b.pdf")));
        assert_eq!(parse_command("/settings"), Command::Settings(None));
        assert_eq!(
            parse_command("/settings {\"temperature\": 1}"),
            Command::Settings(Some("{\"temperature\": 1}".into()))
        );
    }

    #[test]
    fn document_commands() {
        assert_eq!(parse_command("/docs"), Command::Documents);
        assert_eq!(parse_command("/docs delete 7"), Command::DeleteDocument("7".into()));
        assert_eq!(parse_command("/docs delete all"), Command::DeleteAllDocuments);
        assert!(matches!(parse_command("/docs delete"), Command::Invalid(_)));
        assert!(matches!(parse_command("/docs purge"), Command::Invalid(_)));
    }

    #[test]
    fn missing_arguments_show_usage() {
        assert!(matches!(parse_command("/open"), Command::Invalid(_)));
        assert!(matches!(parse_command("/run zero"), Command::Invalid(_)));
        assert!(matches!(parse_command("/run 0"), Command::Invalid(_)));
    }

    #[test]
    fn typos_get_a_suggestion() {
        assert_eq!(
            parse_command("/delet"),
            Command::Unknown { input: "/delet".into(), suggestion: Some("/delete") }
        );
        assert_eq!(
            parse_command("/zzzzzzzz"),
            Command::Unknown { input: "/zzzzzzzz".into(), suggestion: None }
        );
    }

    #[test]
    fn assistant_messages_mention_runnable_blocks() {
        let event = SessionEvent::MessageRendered {
            conversation_id: "c".into(),
            message: ChatMessage::assistant("Try:\n```python\nprint(1)\n```"),
        };
        let line = describe_event(&event).unwrap();
        assert!(line.starts_with("assistant: Try:"));
        assert!(line.contains("1 runnable block(s)"));

        let user = SessionEvent::MessageRendered {
            conversation_id: "c".into(),
            message: ChatMessage::user("hi"),
        };
        assert_eq!(describe_event(&user), None);
    }

    #[test]
    fn opened_conversation_prints_history() {
        let mut conversation = Conversation::with_id("c1", "Greeting");
        conversation.push(ChatMessage::user("hi"));
        conversation.push(ChatMessage::assistant("hello"));
        let line = describe_event(&SessionEvent::ConversationOpened { conversation }).unwrap();
        assert_eq!(line, "== Greeting (c1) ==\nyou: hi\nassistant: hello");
    }

    #[test]
    fn toasts_are_tagged() {
        let line = describe_event(&SessionEvent::Toast {
            level: ToastLevel::Warning,
            title: "Warning".into(),
            message: "Settings saved locally.".into(),
        });
        assert_eq!(line.as_deref(), Some("[warn] Warning: Settings saved locally."));
    }
}
